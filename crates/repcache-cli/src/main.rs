//! repcache - terminal front-end for the coaching client's cached state.
//!
//! Every command restores the persisted session and timer, does its work
//! against the caches, and exits. `listen` keeps the push channel open and
//! prints notices until interrupted.

use std::io;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repcache_core::auth::{Role, SessionData};
use repcache_core::models::CardioKind;
use repcache_core::utils::{format_elapsed, format_optional, truncate_string};
use repcache_core::{AppContext, Config, RoutineView, TimerStatus};

// ============================================================================
// Constants
// ============================================================================

/// Width of the name column in list output
const NAME_COLUMN_WIDTH: usize = 32;

const USAGE: &str = "\
Usage: repcache <command> [options]

Commands:
  login --token <jwt> --user <id> --role <student|coach> [--name <name>]
  logout
  status
  routine [--student <id>] [--refresh]
  select <index> [--student <id>]
  history [--student <id>] [--full] [--refresh]
  dashboard [--student <id>] [--refresh]
  catalog [--refresh]
  muscles [--refresh]
  timer <start <kind>|pause|resume|stop|reset|show>
  timer submit [--distance <km>] [--calories <n>] [--notes <text>]
  listen

Set RUST_LOG (e.g. RUST_LOG=debug) to control logging.";

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr; when a log directory is available a daily
/// rolling file is written too. The returned guard flushes it on drop.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "repcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Minimal flag parser: positional words plus `--flag value` / `--switch`.
struct Args {
    positional: Vec<String>,
    flags: Vec<(String, Option<String>)>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Self {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut raw = raw.peekable();
        while let Some(arg) = raw.next() {
            if let Some(name) = arg.strip_prefix("--") {
                let value = match raw.peek() {
                    Some(next) if !next.starts_with("--") => raw.next(),
                    _ => None,
                };
                flags.push((name.to_string(), value));
            } else {
                positional.push(arg);
            }
        }
        Self { positional, flags }
    }

    fn word(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(flag, _)| flag == name)
            .and_then(|(_, value)| value.as_deref())
    }

    fn switch(&self, name: &str) -> bool {
        self.flags.iter().any(|(flag, _)| flag == name)
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.value(name)
            .map(|v| {
                v.parse()
                    .map_err(|e| anyhow!("Invalid value for --{}: {}", name, e))
            })
            .transpose()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _guard = init_tracing(&config);

    let args = Args::parse(std::env::args().skip(1));
    let Some(command) = args.word(0) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let ctx = AppContext::new(&config).context("Failed to initialize")?;
    info!(command, "repcache starting");

    match command {
        "login" => login(&ctx, &args).await,
        "logout" => {
            ctx.restore();
            ctx.logout().await?;
            println!("Logged out");
            Ok(())
        }
        "status" => {
            ctx.restore();
            status(&ctx);
            Ok(())
        }
        "routine" => {
            ctx.restore();
            let student_id = ctx.student_id(args.parsed("student")?)?;
            let view = ctx.load_routine(student_id, args.switch("refresh")).await?;
            print_routine(&view);
            Ok(())
        }
        "select" => {
            ctx.restore();
            let index: usize = args
                .word(1)
                .ok_or_else(|| anyhow!("select needs a microcycle index"))?
                .parse()
                .context("Index must be a number")?;
            let student_id = ctx.student_id(args.parsed("student")?)?;
            ctx.load_routine(student_id, false).await?;
            if !ctx.routine().select_micro(index) {
                bail!("No microcycle {} in the active cycle", index);
            }
            print_routine(&ctx.routine().view());
            Ok(())
        }
        "history" => {
            ctx.restore();
            let student_id = ctx.student_id(args.parsed("student")?)?;
            let refresh = args.switch("refresh");
            let sessions = if args.switch("full") {
                ctx.full_history(student_id, refresh).await?
            } else {
                ctx.history(student_id, refresh).await?
            };
            for session in sessions {
                println!(
                    "{}  {:<width$}  {}",
                    session.performed_at.format("%Y-%m-%d %H:%M"),
                    truncate_string(
                        &format_optional(session.day_name.as_deref(), "Workout"),
                        NAME_COLUMN_WIDTH
                    ),
                    session
                        .duration_seconds
                        .map(format_elapsed)
                        .unwrap_or_default(),
                    width = NAME_COLUMN_WIDTH
                );
            }
            Ok(())
        }
        "dashboard" => {
            ctx.restore();
            let student_id = ctx.student_id(args.parsed("student")?)?;
            let summary = ctx.dashboard(student_id, args.switch("refresh")).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        "catalog" => {
            ctx.restore();
            let exercises = ctx.exercise_catalog(args.switch("refresh")).await?;
            for exercise in &exercises {
                println!(
                    "{:>6}  {}",
                    exercise.id,
                    truncate_string(&exercise.name, NAME_COLUMN_WIDTH)
                );
            }
            println!(
                "{} exercises (cached {})",
                exercises.len(),
                ctx.caches().cache_ages().catalog_age()
            );
            Ok(())
        }
        "muscles" => {
            ctx.restore();
            for group in ctx.muscle_groups(args.switch("refresh")).await? {
                println!("{:>6}  {}", group.id, group.name);
            }
            Ok(())
        }
        "timer" => {
            ctx.restore();
            timer(&ctx, &args).await
        }
        "listen" => listen(&ctx).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

async fn login(ctx: &AppContext, args: &Args) -> Result<()> {
    let token = args
        .value("token")
        .ok_or_else(|| anyhow!("login needs --token"))?;
    let user_id: i64 = args
        .parsed("user")?
        .ok_or_else(|| anyhow!("login needs --user"))?;
    let role: Role = args.parsed("role")?.unwrap_or(Role::Student);

    ctx.restore();
    ctx.login(SessionData {
        token: token.to_string(),
        user_id,
        display_name: args.value("name").unwrap_or_default().to_string(),
        role,
        created_at: Utc::now(),
    })
    .await?;
    println!("Logged in as {} {}", role, user_id);
    Ok(())
}

fn status(ctx: &AppContext) {
    match ctx.session_data() {
        Some(data) => println!(
            "Logged in: {} ({}, id {})",
            format_optional(Some(data.display_name).filter(|n| !n.is_empty()), "-"),
            data.role,
            data.user_id
        ),
        None => println!("Not logged in"),
    }

    let ages = ctx.caches().cache_ages();
    println!("Exercise catalog: {}", ages.catalog_age());
    println!("Students summary: {}", ages.students_age());

    let timer = ctx.timer();
    if timer.status() != TimerStatus::Idle {
        println!(
            "Timer: {:?} {} {}",
            timer.status(),
            format_optional(timer.activity_kind(), "-"),
            format_elapsed(timer.display_seconds())
        );
    }
}

fn print_routine(view: &RoutineView) {
    let Some(ref macrocycle) = view.macrocycle else {
        println!("No routine assigned");
        return;
    };
    println!("{}", macrocycle.name);
    let Some(ref cycle) = view.active_cycle else {
        println!("  No active cycle");
        return;
    };
    println!("  {}", cycle.name);
    for (index, micro) in cycle.microcycles.iter().enumerate() {
        let marker = if index == view.selected_micro_index { '>' } else { ' ' };
        println!("  {} [{}] {}", marker, index, micro.name);
        if index == view.selected_micro_index {
            for day in &micro.days {
                println!(
                    "        {}  {}",
                    format_optional(day.date, "          "),
                    truncate_string(&day.name, NAME_COLUMN_WIDTH)
                );
            }
        }
    }
}

async fn timer(ctx: &AppContext, args: &Args) -> Result<()> {
    match args.word(1).unwrap_or("show") {
        "start" => {
            let kind: CardioKind = args
                .word(2)
                .ok_or_else(|| anyhow!("timer start needs an activity kind"))?
                .parse()?;
            let owner = ctx.student_id(None)?;
            ctx.timer().start(kind, owner);
        }
        "pause" => ctx.timer().pause(),
        "resume" => ctx.timer().resume(),
        "stop" => ctx.timer().stop(),
        "reset" => ctx.timer().reset(),
        "show" => {}
        "submit" => {
            {
                let mut timer = ctx.timer();
                timer.set_distance_km(args.parsed("distance")?);
                timer.set_calories(args.parsed("calories")?);
                timer.set_notes(args.value("notes").map(str::to_string));
            }
            let session = ctx.submit_cardio().await?;
            println!(
                "Submitted {} ({})",
                format_optional(session.day_name.as_deref(), "cardio"),
                format_elapsed(session.duration_seconds.unwrap_or_default())
            );
            return Ok(());
        }
        other => bail!("Unknown timer action: {}", other),
    }

    let mut timer = ctx.timer();
    let seconds = timer.update_elapsed();
    println!(
        "{:?} {} {}",
        timer.status(),
        format_optional(timer.activity_kind(), "-"),
        format_elapsed(seconds)
    );
    Ok(())
}

async fn listen(ctx: &AppContext) -> Result<()> {
    if !ctx.resume().await {
        bail!("Not logged in");
    }
    if !ctx.channel().is_active() {
        bail!("Push notifications are only delivered to students");
    }
    let mut notices = ctx
        .take_notices()
        .ok_or_else(|| anyhow!("Notice receiver already taken"))?;

    println!("Listening for routine changes (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Some(notice) => println!("{}: {}", notice.title, notice.body),
                None => break,
            },
        }
    }
    ctx.channel().disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Args {
        Args::parse(raw.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags_and_words() {
        let parsed = args(&["routine", "--student", "12", "--refresh"]);
        assert_eq!(parsed.word(0), Some("routine"));
        assert_eq!(parsed.parsed::<i64>("student").unwrap(), Some(12));
        assert!(parsed.switch("refresh"));
        assert_eq!(parsed.value("refresh"), None);
    }

    #[test]
    fn test_invalid_flag_value() {
        let parsed = args(&["timer", "submit", "--distance", "far"]);
        assert!(parsed.parsed::<f64>("distance").is_err());
        assert_eq!(parsed.word(1), Some("submit"));
    }
}
