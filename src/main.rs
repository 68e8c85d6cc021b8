use diffmut::config::{OutputFormat, RunConfig};
use diffmut::error::Error;
use diffmut::git::{self, DiffSource, GitCli};
use diffmut::output;
use diffmut::pipeline;
use diffmut::provider::CommandProvider;
use diffmut::state;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "diffmut", version, about = "Mutation testing for the lines you changed")]
struct Cli {
    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate mutations for changed lines and run the test suite against each
    Run {
        /// Shell command that runs the test suite
        #[arg(long)]
        test_command: Option<String>,
        /// Git ref to diff against
        #[arg(long)]
        diff_base: Option<String>,
        /// Total mutations to request across all changed files
        #[arg(long)]
        mutations: Option<usize>,
        /// Max seconds per test run
        #[arg(long)]
        timeout: Option<u64>,
        /// Command that turns a prompt on stdin into mutation JSON on stdout
        #[arg(long, env = "DIFFMUT_PROVIDER_COMMAND")]
        provider_command: Option<String>,
        /// Only mutate files matching these globs
        #[arg(long, num_args = 1..)]
        include: Vec<String>,
        /// Skip files matching these globs
        #[arg(long, num_args = 1..)]
        exclude: Vec<String>,
        /// Also mutate files that look like tests
        #[arg(long)]
        include_tests: bool,
        /// Ask for mutations that keep type checkers happy
        #[arg(long)]
        type_checked: bool,
        /// Send commit messages along with the diff
        #[arg(long)]
        commit_context: bool,
        /// Generate mutations without running tests
        #[arg(long)]
        dry_run: bool,
        /// Exit with code 2 if any mutation survives
        #[arg(long)]
        fail_on_survived: bool,
        /// Report format
        #[arg(long, value_enum)]
        output: Option<OutputFormat>,
        /// Path to a config file (default: nearest .diffmut.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Summary of the last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let exit_code = match cli.command {
        Commands::Run {
            test_command,
            diff_base,
            mutations,
            timeout,
            provider_command,
            include,
            exclude,
            include_tests,
            type_checked,
            commit_context,
            dry_run,
            fail_on_survived,
            output,
            config,
        } => {
            let overrides = Overrides {
                test_command,
                diff_base,
                mutations,
                timeout,
                provider_command,
                include,
                exclude,
                include_tests,
                type_checked,
                commit_context,
                dry_run,
                fail_on_survived,
                output,
            };
            cmd_run(overrides, config)
        }
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct Overrides {
    test_command: Option<String>,
    diff_base: Option<String>,
    mutations: Option<usize>,
    timeout: Option<u64>,
    provider_command: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    include_tests: bool,
    type_checked: bool,
    commit_context: bool,
    dry_run: bool,
    fail_on_survived: bool,
    output: Option<OutputFormat>,
}

impl Overrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(v) = self.test_command {
            config.test_command = Some(v);
        }
        if let Some(v) = self.diff_base {
            config.diff_base = v;
        }
        if let Some(v) = self.mutations {
            config.mutations = v;
        }
        if let Some(v) = self.timeout {
            config.timeout_secs = v;
        }
        if let Some(v) = self.provider_command {
            config.provider_command = Some(v);
        }
        if !self.include.is_empty() {
            config.include = self.include;
        }
        if !self.exclude.is_empty() {
            config.exclude = self.exclude;
        }
        if let Some(v) = self.output {
            config.output = v;
        }
        config.exclude_tests &= !self.include_tests;
        config.type_checked |= self.type_checked;
        config.commit_context |= self.commit_context;
        config.dry_run |= self.dry_run;
        config.fail_on_survived |= self.fail_on_survived;
    }
}

fn cmd_run(overrides: Overrides, config_path: Option<PathBuf>) -> i32 {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if !git::is_inside_work_tree(&cwd) {
        output::print_error("Not inside a git repository.");
        return 1;
    }

    let mut config = match RunConfig::load(config_path.as_deref(), &cwd) {
        Ok(c) => c,
        Err(e) => {
            output::print_error(&e.to_string());
            return 1;
        }
    };
    overrides.apply(&mut config);
    let source_name = config_path.unwrap_or_else(|| PathBuf::from("command line"));
    if let Err(e) = config.validate(&source_name) {
        output::print_error(&e.to_string());
        return 1;
    }

    let Some(provider_command) = config.provider_command.clone() else {
        output::print_error(
            "No mutation provider configured. Pass --provider-command or set provider_command in .diffmut.toml.",
        );
        return 1;
    };
    let provider = CommandProvider::new(provider_command, config.provider_timeout());
    let source = GitCli::new(&cwd);

    let result = match pipeline::run_pipeline(&config, &source, &provider) {
        Ok(r) => r,
        Err(Error::Preflight { message, output: test_output }) => {
            output::print_error(&message);
            if !test_output.trim().is_empty() {
                eprintln!("{test_output}");
            }
            return 1;
        }
        Err(e) => {
            output::print_error(&e.to_string());
            return 1;
        }
    };

    if let Ok(root) = source.root() {
        state::save_last_run(&root, &result);
    }

    match config.output {
        OutputFormat::Json => output::print_json(&result),
        OutputFormat::Text => output::print_pipeline_result(&result),
    }

    if config.fail_on_survived && result.survived > 0 { 2 } else { 0 }
}

fn cmd_status(json_mode: bool) -> i32 {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let root = GitCli::new(&cwd).root().unwrap_or(cwd);

    match state::load_last_run(&root) {
        Some(result) => {
            if json_mode {
                output::print_json(&result);
            } else {
                output::print_status(&result);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `diffmut run` first.");
            2
        }
    }
}
