use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use concurrency_patterns::accumulator::format_cents;
use concurrency_patterns::basics::{interleave, switch_count, thread_tour};
use concurrency_patterns::game::GameRun;
use concurrency_patterns::matrix::{par_multiply, Matrix};
use concurrency_patterns::search::{student_servers, CooperativeMultiSearch};
use concurrency_patterns::{
    logging, AccumulatorScenario, DomainDecompositionEngine, Guarding, TaskDecompositionPair,
    ToolkitConfig, TrialSummary,
};

// =============================================================================
// Scenarios
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Threads,
    Interleave,
    Game,
    Matrix,
    Search,
    Race,
    NoRace,
    Bank,
}

impl Scenario {
    const ALL: [Scenario; 8] = [
        Scenario::Threads,
        Scenario::Interleave,
        Scenario::Game,
        Scenario::Matrix,
        Scenario::Search,
        Scenario::Race,
        Scenario::NoRace,
        Scenario::Bank,
    ];

    fn title(self) -> &'static str {
        match self {
            Scenario::Threads => "Thread Basics - Sleep, Yield, Spawn",
            Scenario::Interleave => "Thread Interleaving",
            Scenario::Game => "Game Simulation - Task Decomposition",
            Scenario::Matrix => "Matrix Multiplication - Domain Decomposition",
            Scenario::Search => "File Search - Cooperative Early Stop",
            Scenario::Race => "Race Condition (UNGUARDED)",
            Scenario::NoRace => "No Race Condition (GUARDED)",
            Scenario::Bank => "Bank Account Race",
        }
    }

    fn from_choice(choice: &str) -> Option<Self> {
        match choice {
            "1" | "threads" => Some(Scenario::Threads),
            "2" | "interleave" => Some(Scenario::Interleave),
            "3" | "game" => Some(Scenario::Game),
            "4" | "matrix" => Some(Scenario::Matrix),
            "5" | "search" => Some(Scenario::Search),
            "6" | "race" => Some(Scenario::Race),
            "7" | "no-race" => Some(Scenario::NoRace),
            "8" | "bank" => Some(Scenario::Bank),
            _ => None,
        }
    }

    fn run(self, config: &ToolkitConfig) {
        banner(self.title());
        match self {
            Scenario::Threads => run_threads(),
            Scenario::Interleave => run_interleave(),
            Scenario::Game => run_game(config),
            Scenario::Matrix => run_matrix(config),
            Scenario::Search => run_search(config),
            Scenario::Race => {
                print_trials(AccumulatorScenario::counter(&config.counter, Guarding::Unguarded).run())
            }
            Scenario::NoRace => {
                print_trials(AccumulatorScenario::counter(&config.counter, Guarding::Guarded).run())
            }
            Scenario::Bank => run_bank(config),
        }
    }
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{}", title.bold());
    println!("{}\n", "=".repeat(60));
}

fn run_threads() {
    match thread_tour(Duration::from_secs(1)) {
        Ok(tour) => {
            println!("main thread = {}", tour.caller.cyan());
            println!("slept for {:?}, then yielded", tour.slept);
            println!("task ran in {}", tour.worker.cyan());
        }
        Err(err) => println!("{} {err}", "error:".red()),
    }
}

fn run_interleave() {
    for iteration in 1..=3 {
        match interleave(&['a', 'b'], 100, 1_000) {
            Ok(transcript) => println!(
                "{transcript}  ({} switches)",
                switch_count(&transcript).to_string().cyan()
            ),
            Err(err) => println!("{} iteration {iteration}: {err}", "error:".red()),
        }
    }
}

fn run_game(config: &ToolkitConfig) {
    let pair = match TaskDecompositionPair::new(config.game.clone()) {
        Ok(pair) => pair,
        Err(err) => {
            println!("{} {err}", "error:".red());
            return;
        }
    };
    match pair.run() {
        GameRun {
            history: Ok(history),
            frames: Ok(frames),
        } => {
            let last = history.last().map(ToString::to_string).unwrap_or_default();
            println!(
                "Model published {} updates, final position {}",
                history.len(),
                last.green()
            );
            println!("View rendered {} frames", frames.len());
        }
        GameRun { history, frames } => {
            for err in [history.err(), frames.err()].into_iter().flatten() {
                println!("{} {err}", "role failed:".red());
            }
        }
    }
    println!("\nGame simulation completed!");
}

fn run_matrix(config: &ToolkitConfig) {
    let size = config.matrix.size;
    let a = Matrix::patterned(size, size, 1);
    let b = Matrix::patterned(size, size, 2);

    println!("Matrix A:\n{a}");
    println!("Matrix B:\n{b}");

    let engine = match DomainDecompositionEngine::new(config.matrix.effective_workers()) {
        Ok(engine) => engine,
        Err(err) => {
            println!("{} {err}", "error:".red());
            return;
        }
    };
    println!(
        "Starting parallel computation with {} workers...\n",
        engine.workers()
    );

    match engine.run(&a, &b) {
        Ok(product) => {
            for (index, range) in product.partitions.iter().enumerate() {
                println!("Worker-{} computed rows {:?}", index + 1, range);
            }
            println!("\nResult Matrix (A x B):\n{}", product.matrix);
            println!("Computation time: {:?}", product.elapsed);

            match par_multiply(&a, &b) {
                Ok(baseline) if baseline == product.matrix => {
                    println!("rayon baseline: {}", "matches".green())
                }
                Ok(_) => println!("rayon baseline: {}", "DIFFERS".red()),
                Err(err) => println!("{} {err}", "error:".red()),
            }
        }
        Err(err) => println!("{} {err}", "error:".red()),
    }
}

fn run_search(config: &ToolkitConfig) {
    let servers = student_servers();
    let search = CooperativeMultiSearch::new(config.search.record_delay());

    for (test, target) in config.search.targets.iter().enumerate() {
        println!("Test {}: searching for student ID {target}\n", test + 1);
        let report = search.search_with_report(target, &servers);
        for scan in &report.scans {
            match scan {
                Ok(scan) => println!(
                    "  {:<16} inspected {}/{} ({:?})",
                    scan.partition, scan.inspected, scan.partition_len, scan.outcome
                ),
                Err(err) => println!("  {} {err}", "failed:".red()),
            }
        }
        match report.result {
            Ok(hit) => println!("\nResult: {}\n", hit.record.to_string().green()),
            Err(err) => println!("\nResult: {}\n", err.to_string().yellow()),
        }
    }
}

fn run_bank(config: &ToolkitConfig) {
    for guarding in [Guarding::Unguarded, Guarding::Guarded] {
        let summary = match AccumulatorScenario::bank(&config.bank, guarding).run() {
            Ok(summary) => summary,
            Err(err) => {
                println!("{} {err}", "error:".red());
                return;
            }
        };
        println!("[{}]", summary.label.cyan());
        println!("Expected final balance: {}", format_cents(summary.expected));
        for trial in &summary.trials {
            println!("Actual final balance:   {}", format_cents(trial.value));
        }
        println!(
            "Money lost to the race: {}\n",
            format_cents(summary.total_lost())
        );
    }
}

fn print_trials(summary: concurrency_patterns::Result<TrialSummary>) {
    let summary = match summary {
        Ok(summary) => summary,
        Err(err) => {
            println!("{} {err}", "error:".red());
            return;
        }
    };
    println!("[{}]", summary.label.cyan());
    for trial in &summary.trials {
        let value = if trial.value == summary.expected {
            trial.value.to_string().green()
        } else {
            trial.value.to_string().red()
        };
        println!(
            "Trial {}: counter = {} (expected {})",
            trial.trial, value, summary.expected
        );
    }
    println!(
        "\n{} exact, {} divergent, {} with failed workers",
        summary.exact_trials(),
        summary.divergent_trials(),
        summary.failed_trials()
    );
}

// =============================================================================
// Menu
// =============================================================================

fn print_menu() {
    println!("\n{}", "=".repeat(60));
    println!("  {}", "CONCURRENCY DEMONSTRATIONS".bold());
    println!("{}", "=".repeat(60));
    for (index, scenario) in Scenario::ALL.iter().enumerate() {
        println!("  {}. {}", index + 1, scenario.title());
    }
    println!("  0. Run ALL examples");
    println!("  Q. Quit");
}

fn run_all(config: &ToolkitConfig) {
    for scenario in Scenario::ALL {
        scenario.run(config);
    }
    println!("\n{}", "ALL EXAMPLES COMPLETED!".green().bold());
}

fn interactive(config: &ToolkitConfig) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_menu();
        print!("\nEnter your choice (0-8): ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let choice = line?.trim().to_ascii_lowercase();

        match choice.as_str() {
            "q" => {
                println!("Goodbye!");
                return Ok(());
            }
            "0" | "all" => run_all(config),
            other => match Scenario::from_choice(other) {
                Some(scenario) => scenario.run(config),
                None => println!("{}", "Invalid choice. Please try again.".yellow()),
            },
        }
    }
}

fn usage() {
    eprintln!("Usage: concurrency_demos [--config <file.toml>] [all|threads|interleave|game|matrix|search|race|no-race|bank]");
}

fn main() -> ExitCode {
    let mut config_path: Option<PathBuf> = None;
    let mut choices = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    usage();
                    return ExitCode::FAILURE;
                }
            },
            "-h" | "--help" => {
                usage();
                return ExitCode::SUCCESS;
            }
            _ => choices.push(arg),
        }
    }

    let config = match config_path {
        Some(path) => match ToolkitConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{} {err}", "config error:".red());
                return ExitCode::FAILURE;
            }
        },
        None => ToolkitConfig::default(),
    };
    logging::init(&config.logging);

    if choices.is_empty() {
        return match interactive(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{} {err}", "io error:".red());
                ExitCode::FAILURE
            }
        };
    }

    for choice in &choices {
        match choice.as_str() {
            "all" | "0" => run_all(&config),
            other => match Scenario::from_choice(other) {
                Some(scenario) => scenario.run(&config),
                None => {
                    eprintln!("Unknown scenario '{other}'");
                    usage();
                    return ExitCode::FAILURE;
                }
            },
        }
    }
    ExitCode::SUCCESS
}
