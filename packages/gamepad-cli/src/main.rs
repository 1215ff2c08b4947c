mod menu;
mod script;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Term;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use gamepad::{BatchKind, Gamepad, GamepadConfig, Levels, Request, TapContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::menu::MenuAction;
use crate::script::{Script, ScriptGame};
use crate::session::Session;

/// How long a single step may take before the engine is considered stuck.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "gamepad")]
#[command(about = "Step through a scripted puzzle forward and backward")]
struct Cli {
    /// JSON script with the levels and their steps
    #[arg(long)]
    script: PathBuf,

    /// Number of runs (defaults to the number of levels)
    #[arg(long)]
    times: Option<usize>,

    /// Do not replay the level stores with history
    #[arg(long)]
    no_magic_json: bool,

    /// Print every step as it runs
    #[arg(long)]
    highlight: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gamepad=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = GamepadConfig::from_env().context("Failed to load configuration")?;
    if cli.no_magic_json {
        config.magic_json = false;
    }
    if cli.highlight {
        config.highlight = true;
    }

    let script = Script::load(&cli.script)?;
    let times = cli.times.unwrap_or(script.levels.len());
    let levels = Levels::new(script.starts()).context("Script levels must be objects or arrays")?;

    let gamepad = Gamepad::builder()
        .with_config(config)
        .with_levels(levels.clone())
        .with_game(ScriptGame::new(script.clone(), levels))
        .with_tap(
            |request: &Request, ctx: &TapContext| -> Result<()> {
                let arrow = if ctx.back { "◀" } else { "▶" };
                println!("  {} {}", arrow.bright_cyan(), request.id().bright_white());
                Ok(())
            },
            "highlight",
        )
        .build()?;

    let term = Term::stdout();
    print_banner(&term)?;

    let mut session = Session::start(gamepad, script, times)?;
    let labels = MenuAction::labels();

    loop {
        println!();
        print_status(&session.gamepad);

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact_on(&term)?;

        match MenuAction::ALL[selection] {
            MenuAction::Forward => step(&session.gamepad, false).await,
            MenuAction::Backward => step(&session.gamepad, true).await,
            MenuAction::Play => session.gamepad.play(false),
            MenuAction::PlayBackward => session.gamepad.play(true),
            MenuAction::Pause => session.gamepad.pause(),
            MenuAction::RunToBreakpoint => run_to_breakpoint(&session.gamepad, &term).await?,
            MenuAction::ShowTree => print_levels(&session.gamepad)?,
            MenuAction::ShowHistory => print_history(&session.gamepad),
            MenuAction::Reset => {
                session.load()?;
                println!("{}", "🔄 Program reloaded".bright_green());
            }
            MenuAction::Exit => {
                println!("{}", "👋 Goodbye!".bright_blue());
                break;
            }
        }

        print_changes(&mut session);
    }

    Ok(())
}

fn print_banner(term: &Term) -> Result<()> {
    term.clear_screen()?;
    println!(
        "{}",
        "╔════════════════════════════════════════╗".bright_cyan()
    );
    println!(
        "{}",
        "║          Gamepad Step Console          ║".bright_cyan()
    );
    println!(
        "{}",
        "╚════════════════════════════════════════╝".bright_cyan()
    );
    println!();
    Ok(())
}

fn print_status(gamepad: &Gamepad) {
    let (index, len) = gamepad
        .stores()
        .with(|manager| (manager.index(), manager.len()));
    let running = if gamepad.is_running() {
        "running".bright_green()
    } else {
        "paused".yellow()
    };
    println!(
        "{} {}/{}  {} {}  {}",
        "Level".dimmed(),
        index + 1,
        len,
        "State".dimmed(),
        gamepad.state().to_string().bright_white(),
        running
    );
}

async fn step(gamepad: &Gamepad, back: bool) {
    let navigation = if back {
        tokio::time::timeout(STEP_TIMEOUT, gamepad.backward()).await
    } else {
        tokio::time::timeout(STEP_TIMEOUT, gamepad.forward()).await
    };
    match navigation {
        Ok(true) => {}
        Ok(false) => println!("{}", "Nothing to do".yellow()),
        Err(_) => println!("{}", "⚠️  The engine is not responding".bright_red()),
    }
}

async fn run_to_breakpoint(gamepad: &Gamepad, term: &Term) -> Result<()> {
    let id: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Step id")
        .interact_text_on(term)?;

    let Some(hit) = gamepad.debug(id.trim(), false) else {
        return Ok(());
    };
    match tokio::time::timeout(STEP_TIMEOUT, hit.wait()).await {
        Ok(true) => println!("{} {}", "🎯 Reached".bright_green(), id.bright_white()),
        Ok(false) => println!("{}", "Breakpoint cleared before it was reached".yellow()),
        Err(_) => {
            gamepad.pause();
            println!("{} {}", "Step not reached:".yellow(), id);
        }
    }
    Ok(())
}

fn print_levels(gamepad: &Gamepad) -> Result<()> {
    let current = gamepad.stores().index();
    for (index, level) in gamepad.levels().iter().enumerate() {
        let title = format!("Level {}", index + 1);
        if index == current {
            println!("{}", title.bright_cyan().bold());
        } else {
            println!("{}", title.dimmed());
        }
        println!("{}", serde_json::to_string_pretty(level)?);
    }
    Ok(())
}

fn print_history(gamepad: &Gamepad) {
    let (entries, cursor) = gamepad.worker().history();
    if entries.is_empty() {
        println!("{}", "No steps yet".dimmed());
        return;
    }
    for (index, request) in entries.iter().enumerate() {
        let line = request.to_string();
        if index as isize == cursor {
            println!("{} {}", "→".bright_green(), line.bright_white());
        } else if index as isize > cursor {
            println!("  {}", line.dimmed());
        } else {
            println!("  {line}");
        }
    }
}

fn print_changes(session: &mut Session) {
    for (index, batch) in session.drain_changes() {
        let tag = match batch.kind {
            BatchKind::Commit => "commit".bright_green(),
            BatchKind::Undo => "undo".yellow(),
            BatchKind::Redo => "redo".bright_cyan(),
            BatchKind::Restore => "restore".bright_red(),
        };
        for change in &batch.changes {
            println!("  {} {} {}", format!("L{}", index + 1).dimmed(), tag, change);
        }
    }
}
