//! omni-queue - Manage scheduled posts
//!
//! Unix-style front end to the Omnicast queue: create, list, inspect,
//! cancel and reschedule posts. Results go to stdout, diagnostics to stderr.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use libomnicast::logging::{LogFormat, LoggingConfig};
use libomnicast::scheduler::CreatePostRequest;
use libomnicast::scheduling::{parse_schedule, parse_timezone};
use libomnicast::service::query::QueueStats;
use libomnicast::service::OmnicastService;
use libomnicast::{Config, Content, OmnicastError, PlatformId, PostStatus, PostView};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "omni-queue")]
#[command(version)]
#[command(about = "Create, inspect and cancel scheduled posts")]
#[command(long_about = "\
omni-queue - Create, inspect and cancel scheduled posts

DESCRIPTION:
    omni-queue manages the Omnicast queue. Posts are published by the
    omni-send daemon when they fall due.

COMMANDS:
    create      Schedule a post to one or more platforms
    list        List posts, optionally filtered by status
    show        Show a post with its per-platform outcome
    cancel      Cancel a pending post
    reschedule  Move a pending post to a new time
    stats       Count posts per status

USAGE EXAMPLES:
    # Publish as soon as the daemon next ticks
    omni-queue create -p linkedin -p x \"We're hiring!\"

    # Schedule in a timezone
    omni-queue create -p facebook --at 2025-06-01T09:00 --tz America/New_York \"Open house\"

    # Relative times work too
    omni-queue create -p x --at 2h \"Reminder: webinar soon\"

    # Inspect what happened
    omni-queue show <POST_ID> --format json

    # Move a pending post
    omni-queue reschedule <POST_ID> 2025-06-02T10:00 --tz Europe/Berlin

CONFIGURATION:
    Configuration file: ~/.config/omnicast/config.toml

    Override with environment variables:
        OMNICAST_CONFIG    - Path to config file
        OMNICAST_DB_PATH   - Path to database file
        OMNICAST_OWNER     - Owner whose posts are managed

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration error
    3 - Invalid input (bad time, timezone, platform, empty content)
    4 - Post not found, or not in a state that allows the operation
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Owner whose posts are managed (defaults to $USER)
    #[arg(long, global = true, env = "OMNICAST_OWNER")]
    owner: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH", env = "OMNICAST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule a post
    Create {
        /// Post text
        text: String,

        /// Target platform (repeatable, or comma separated)
        #[arg(short, long = "platform", required = true, value_delimiter = ',')]
        platforms: Vec<PlatformId>,

        /// When to publish: "now", a delay like "90m", or YYYY-MM-DDTHH:MM
        #[arg(long, default_value = "now")]
        at: String,

        /// IANA timezone for wall-clock times
        #[arg(long, default_value = "UTC")]
        tz: String,

        /// Hashtag (repeatable; leading '#' optional)
        #[arg(long = "hashtag")]
        hashtags: Vec<String>,

        /// Call-to-action line
        #[arg(long)]
        cta: Option<String>,

        /// URL of an image or video
        #[arg(long)]
        media: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List posts
    List {
        /// Only posts with this status
        #[arg(short, long)]
        status: Option<PostStatus>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show one post with its platform attempts
    Show {
        post_id: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Cancel a pending post
    Cancel { post_id: String },

    /// Move a pending post to a new time
    Reschedule {
        post_id: String,

        /// New time: "now", a delay like "2h", or YYYY-MM-DDTHH:MM
        time: String,

        /// IANA timezone for wall-clock times
        #[arg(long, default_value = "UTC")]
        tz: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Count posts per status
    Stats {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Quiet unless asked; stdout carries the results
    let level = if cli.verbose { "debug" } else { "error" };
    LoggingConfig::new(LogFormat::Text, level.to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<OmnicastError>()
            .map(OmnicastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let owner = resolve_owner(cli.owner)?;

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let service = OmnicastService::from_config(config).await?;

    match cli.command {
        Commands::Create {
            text,
            platforms,
            at,
            tz,
            hashtags,
            cta,
            media,
            format,
        } => {
            let content = Content {
                text,
                hashtags,
                call_to_action: cta.unwrap_or_default(),
                media_reference: media,
            };
            cmd_create(&service, &owner, content, platforms, &at, &tz, format).await?;
        }
        Commands::List { status, format } => {
            cmd_list(&service, &owner, status, format).await?;
        }
        Commands::Show { post_id, format } => {
            cmd_show(&service, &owner, &post_id, format).await?;
        }
        Commands::Cancel { post_id } => {
            service.query().cancel(&owner, &post_id).await?;
            println!("{}", post_id);
        }
        Commands::Reschedule {
            post_id,
            time,
            tz,
            format,
        } => {
            let schedule = parse_schedule(&time, &tz)?;
            let view = service
                .scheduler()
                .reschedule(&post_id, &owner, schedule)
                .await?;
            print_created(&view, format)?;
        }
        Commands::Stats { format } => {
            let stats = service.query().stats(&owner).await?;
            print_stats(&stats, format)?;
        }
    }

    Ok(())
}

fn resolve_owner(owner: Option<String>) -> Result<String> {
    owner
        .or_else(|| std::env::var("USER").ok())
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .ok_or_else(|| {
            OmnicastError::Validation("No owner given; pass --owner or set OMNICAST_OWNER".to_string())
                .into()
        })
}

async fn cmd_create(
    service: &OmnicastService,
    owner: &str,
    content: Content,
    platforms: Vec<PlatformId>,
    at: &str,
    tz: &str,
    format: OutputFormat,
) -> Result<()> {
    let schedule = parse_schedule(at, tz)?;
    let view = service
        .scheduler()
        .create(CreatePostRequest {
            owner: owner.to_string(),
            content,
            platforms,
            schedule,
        })
        .await?;

    print_created(&view, format)
}

async fn cmd_list(
    service: &OmnicastService,
    owner: &str,
    status: Option<PostStatus>,
    format: OutputFormat,
) -> Result<()> {
    let views = service.query().list(owner, status).await?;

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = views.iter().map(view_json).collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let now = Utc::now().timestamp();
            for view in &views {
                let post = &view.post;
                let when = if post.status == PostStatus::Pending {
                    format_time_until(now, post.scheduled_time)
                } else {
                    format_local(post.scheduled_time, &post.timezone)
                };
                println!(
                    "{} | {} | {} | {} | {}",
                    post.id,
                    post.status,
                    when,
                    join_platforms(&post.target_platforms),
                    truncate_content(&post.content.text, 40)
                );
            }
        }
    }
    Ok(())
}

async fn cmd_show(
    service: &OmnicastService,
    owner: &str,
    post_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let view = service.query().get(owner, post_id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view_json(&view))?),
        OutputFormat::Text => {
            let post = &view.post;
            println!("id:         {}", post.id);
            println!("status:     {}", post.status);
            println!(
                "scheduled:  {} ({})",
                format_local(post.scheduled_time, &post.timezone),
                format_utc(post.scheduled_time)
            );
            if let Some(published_at) = post.published_at {
                println!("finished:   {}", format_utc(published_at));
            }
            println!("platforms:  {}", join_platforms(&post.target_platforms));
            println!("content:    {}", post.content.compose().replace('\n', " "));
            if let Some(media) = &post.content.media_reference {
                println!("media:      {}", media);
            }

            for attempt in &view.attempts {
                let outcome = match (&attempt.platform_post_id, &attempt.error_kind) {
                    (Some(remote_id), _) => remote_id.clone(),
                    (None, Some(kind)) => format!(
                        "{}: {}",
                        kind,
                        attempt.error_detail.as_deref().unwrap_or_default()
                    ),
                    (None, None) => String::new(),
                };
                println!(
                    "  {:<10} {:<12} tries={} {}",
                    attempt.platform.as_str(),
                    attempt.attempt_status.as_str(),
                    attempt.tries,
                    outcome
                );
            }
        }
    }
    Ok(())
}

fn print_created(view: &PostView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view_json(view))?),
        OutputFormat::Text => println!("{}", view.post.id),
    }
    Ok(())
}

fn print_stats(stats: &QueueStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            for entry in &stats.by_status {
                println!("{:<20} {}", entry.status.as_str(), entry.count);
            }
            println!("{:<20} {}", "total", stats.total);
            if let Some(next) = stats.next_scheduled {
                println!("{:<20} {}", "next", format_utc(next));
            }
        }
    }
    Ok(())
}

fn view_json(view: &PostView) -> serde_json::Value {
    serde_json::json!({
        "post": view.post,
        "attempts": view.attempts,
        "failures": view.failures(),
    })
}

fn join_platforms(platforms: &[PlatformId]) -> String {
    platforms
        .iter()
        .map(PlatformId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn format_utc(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Render in the zone the post was scheduled in
fn format_local(timestamp: i64, timezone: &str) -> String {
    match parse_timezone(timezone) {
        Ok(tz) => tz
            .timestamp_opt(timestamp, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M %Z").to_string())
            .unwrap_or_else(|| format_utc(timestamp)),
        Err(_) => format_utc(timestamp),
    }
}

fn truncate_content(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}

fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;
    if diff <= 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(0, -5), "due");
        assert_eq!(format_time_until(0, 30), "in <1 minute");
        assert_eq!(format_time_until(0, 60), "in 1 minute");
        assert_eq!(format_time_until(0, 7200), "in 2 hours");
        assert_eq!(format_time_until(0, 86400 * 3), "in 3 days");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_content("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_content("short", 40), "short");
        assert_eq!(truncate_content("a\nb", 40), "a b");
    }

    #[test]
    fn test_format_local_uses_post_timezone() {
        // 2025-06-01T13:00Z
        let ts = 1_748_782_800;
        assert_eq!(format_local(ts, "America/New_York"), "2025-06-01 09:00 EDT");
        assert_eq!(format_local(ts, "Not/AZone"), "2025-06-01 13:00:00 UTC");
    }

    #[test]
    fn test_cli_parses_repeated_and_comma_platforms() {
        let cli = Cli::try_parse_from([
            "omni-queue",
            "create",
            "-p",
            "linkedin,x",
            "-p",
            "facebook",
            "hello",
        ])
        .unwrap();

        match cli.command {
            Commands::Create { platforms, at, .. } => {
                assert_eq!(
                    platforms,
                    vec![PlatformId::LinkedIn, PlatformId::X, PlatformId::Facebook]
                );
                assert_eq!(at, "now");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_platform() {
        assert!(Cli::try_parse_from(["omni-queue", "create", "-p", "myspace", "hi"]).is_err());
    }
}
