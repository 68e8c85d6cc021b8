use console::Style;
use crate::mutants::{MutationTestResult, PipelineResult};
use crate::runner;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_json(result: &PipelineResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{json}"),
        Err(e) => print_error(&format!("Failed to serialize result: {e}")),
    }
}

pub fn print_pipeline_result(result: &PipelineResult) {
    if result.total_mutations == 0 {
        print_success("No mutations to test.");
        return;
    }

    let testable = result.killed + result.survived + result.no_coverage;
    let header = if result.survived == 0 {
        Style::new().green().bold().apply_to("✓")
    } else {
        Style::new().yellow().bold().apply_to("!")
    };
    println!(
        "{} Mutation score {:.1}%: {} killed / {} testable in {:.1}s",
        header,
        result.mutation_score,
        result.killed,
        testable,
        result.duration_ms as f64 / 1000.0,
    );

    let dim = Style::new().dim();
    if result.survived > 0 {
        println!("  {} {} survived", dim.apply_to("·"), result.survived);
    }
    if result.no_coverage > 0 {
        println!("  {} {} without coverage", dim.apply_to("·"), result.no_coverage);
    }
    if result.timed_out > 0 {
        println!("  {} {} timed out", dim.apply_to("·"), result.timed_out);
    }
    if result.errors > 0 {
        println!("  {} {} errored", dim.apply_to("·"), result.errors);
    }
    if result.total_token_usage.total_tokens > 0 {
        println!(
            "  {} {} tokens ({} prompt, {} completion)",
            dim.apply_to("·"),
            result.total_token_usage.total_tokens,
            result.total_token_usage.prompt_tokens,
            result.total_token_usage.completion_tokens,
        );
    }

    let survivors: Vec<_> = result.survivors().collect();
    if survivors.is_empty() {
        return;
    }
    println!();
    for r in survivors {
        print_survivor(r);
    }
}

fn print_survivor(r: &MutationTestResult) {
    let m = &r.mutation;
    let ref_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();

    let range = if m.start_line == m.end_line {
        m.start_line.to_string()
    } else {
        format!("{}-{}", m.start_line, m.end_line)
    };
    println!(
        "  {} {}:{} {} {}",
        ref_style.apply_to(&m.id),
        m.file_path,
        range,
        loc_style.apply_to(format!("[{}]", m.category.as_str())),
        m.description,
    );

    let diff = runner::generate_diff(
        &format!("{}\n", m.original_code),
        &format!("{}\n", m.mutated_code),
    );
    for line in diff.lines() {
        if line.starts_with('-') {
            println!("    {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("    {}", Style::new().green().apply_to(line));
        }
    }
}

pub fn print_status(result: &PipelineResult) {
    println!(
        "Last run: {} mutations, {} killed, {} survived ({:.1}% score)",
        result.total_mutations, result.killed, result.survived, result.mutation_score,
    );

    let survivors: Vec<_> = result.survivors().collect();
    if !survivors.is_empty() {
        println!();
        for r in survivors {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}:{} {}",
                ref_style.apply_to(&r.mutation.id),
                r.mutation.file_path,
                r.mutation.start_line,
                r.mutation.description,
            );
        }
    }
}
