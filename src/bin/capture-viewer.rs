use std::collections::HashSet;

use clap::{Parser, Subcommand};
use serde_json::Value;

use capture_proxy::bus::ServerEvent;
use capture_proxy::filter::MatchOptions;
use capture_proxy::message::Body;
use capture_proxy::viewer::{OrderedMessageQueue, SortKey, ViewerClient, DEFAULT_QUEUE_LIMIT};

#[derive(Parser)]
#[command(name = "capture-viewer")]
#[command(about = "Terminal viewer and control client for the capture proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8888")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Proxy status
    Status,
    /// Current route rules
    Routes,
    /// Current breakpoint list
    Breakpoints,
    /// Stream captured traffic
    Tail {
        /// Display filter, e.g. `status:>=400 AND -health`
        #[arg(short, long, default_value = "")]
        filter: String,
        /// Hide Messages matching this filter (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
        #[arg(long)]
        case_sensitive: bool,
        /// Treat needles as regular expressions
        #[arg(long)]
        regex: bool,
        /// Order by response completion instead of request arrival
        #[arg(long)]
        response_order: bool,
        #[arg(long, default_value_t = DEFAULT_QUEUE_LIMIT)]
        limit: usize,
    },
    /// Release a Message held at a breakpoint
    Resume {
        sequence_number: u64,
        /// Replacement response body (JSON or text)
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;
    let base = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/_viewer/status", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Routes => {
            let res = client.get(format!("{}/_viewer/routes", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Breakpoints => {
            let res = client.get(format!("{}/_viewer/breakpoints", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Tail {
            filter,
            exclude,
            case_sensitive,
            regex,
            response_order,
            limit,
        } => {
            let options = MatchOptions { case_sensitive, regex };
            let mut queue = OrderedMessageQueue::new(limit);
            queue.set_filter(&filter, options)?;
            queue.set_excludes(&exclude, options)?;
            if response_order {
                queue.set_sort_key(SortKey::Response);
            }
            tail(&ws_url(&base), &mut queue).await?;
        }
        Commands::Resume { sequence_number, body } => {
            let mut viewer = ViewerClient::connect(&ws_url(&base)).await?;
            viewer.resume(sequence_number, body.as_deref().map(Body::parse)).await?;
            viewer.close().await?;
        }
    }

    Ok(())
}

fn ws_url(base: &str) -> String {
    let rest = base
        .strip_prefix("https://")
        .map(|r| format!("wss://{r}"))
        .or_else(|| base.strip_prefix("http://").map(|r| format!("ws://{r}")))
        .unwrap_or_else(|| format!("ws://{base}"));
    format!("{rest}/_viewer/ws")
}

async fn tail(url: &str, queue: &mut OrderedMessageQueue) -> Result<(), Box<dyn std::error::Error>> {
    let mut viewer = ViewerClient::connect(url).await?;
    let mut printed: HashSet<u64> = HashSet::new();
    let mut declared = false;

    loop {
        let (event, report) = viewer.pump(queue).await?;
        match event {
            ServerEvent::ReqResJson { queued_count, .. } => {
                for message in queue.visible() {
                    if message.is_complete() && printed.insert(message.sequence_number) {
                        println!("#{} {} {}ms", message.sequence_number, message.summary_line(), message.elapsed_time);
                    }
                }
                if let Some(report) = report.filter(|r| r.tabs_sealed > 0) {
                    eprintln!("-- {} tab(s) sealed, {} queued --", report.tabs_sealed, queued_count);
                    printed.clear();
                }
            }
            ServerEvent::Breakpoint { message } => {
                eprintln!("!! held #{} {}", message.sequence_number, message.summary_line());
            }
            ServerEvent::Error { message } => eprintln!("error: {message}"),
            ServerEvent::ProxyConfig { rules } => {
                eprintln!("-- {} route rule(s) --", rules.len());
                // Record every route the proxy currently has.
                if !declared {
                    viewer.declare(rules).await?;
                    declared = true;
                }
            }
            ServerEvent::Breakpoints { breakpoints } => {
                eprintln!("-- {} breakpoint(s) --", breakpoints.len());
            }
        }
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
