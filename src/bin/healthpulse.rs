use clap::{Parser, Subcommand};

use healthpulse::{AlertSeverity, HealthPulse, Identity, NewHealthMetric, Settings};

#[derive(Parser)]
#[command(name = "healthpulse", about = "Health metric log with AI risk assessment")]
struct Cli {
    /// Database path (default: ~/.healthpulse/healthpulse.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (overrides listen_addr)
        #[arg(long)]
        listen: Option<std::net::SocketAddr>,
    },
    /// Manage API tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Log and read health metrics
    Metric {
        #[command(subcommand)]
        action: MetricAction,
    },
    /// Run a risk analysis for a user
    Analyze {
        #[arg(long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a user's risk assessments
    Assessments {
        #[arg(long)]
        user: String,
        /// Only the newest assessment per condition
        #[arg(long)]
        current: bool,
        #[arg(long)]
        json: bool,
    },
    /// Manage alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },
    /// Show a user's dashboard summary
    Dashboard {
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show database status
    Status,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a new token for a user
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// List all tokens
    List,
    /// Revoke a token
    Revoke { token: String },
}

#[derive(Subcommand)]
enum MetricAction {
    /// Log one observation
    Log {
        #[arg(long)]
        user: String,
        #[arg(long)]
        heart_rate: Option<i64>,
        /// Blood pressure as SYS/DIA, e.g. 120/80
        #[arg(long, value_parser = parse_blood_pressure)]
        bp: Option<(i64, i64)>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        stress: Option<i64>,
        #[arg(long)]
        hydration: Option<i64>,
        #[arg(long)]
        energy: Option<i64>,
        #[arg(long)]
        steps: Option<i64>,
        #[arg(long)]
        sleep_hours: Option<f64>,
        #[arg(long)]
        sleep_quality: Option<i64>,
        /// When the reading was taken (RFC 3339, default: now)
        #[arg(long, value_parser = parse_recorded_at)]
        recorded_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Metrics of the last N days, oldest first
    List {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long)]
        json: bool,
    },
    /// The most recent metric
    Latest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AlertAction {
    /// The newest alerts of a user
    List {
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Mark an alert read
    Read {
        #[arg(long)]
        user: String,
        id: String,
    },
    /// Raise an alert for a user
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        message: String,
        /// info, warning or critical
        #[arg(long, default_value = "info")]
        severity: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

fn parse_blood_pressure(raw: &str) -> Result<(i64, i64), String> {
    let (sys, dia) = raw
        .split_once('/')
        .ok_or_else(|| format!("expected SYS/DIA, got {raw}"))?;
    let sys = sys.trim().parse().map_err(|e| format!("systolic: {e}"))?;
    let dia = dia.trim().parse().map_err(|e| format!("diastolic: {e}"))?;
    Ok((sys, dia))
}

fn parse_recorded_at(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, String> {
    healthpulse::date_util::parse_timestamp(raw)
        .ok_or_else(|| format!("not an RFC 3339 timestamp: {raw}"))
}

fn identity(user: &str) -> Identity {
    Identity {
        user_id: user.to_string(),
        email: None,
    }
}

fn show(value: Option<impl std::fmt::Display>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => healthpulse::Database::open_at(path).await?,
        None => healthpulse::Database::open().await?,
    };

    match cli.command {
        Commands::Status => print_status(&db).await?,
        // Config must work even when stored settings do not parse.
        Commands::Config { action } => handle_config(&HealthPulse::offline(db), action).await?,
        command => {
            let settings = Settings::load(&db).await?;
            let hp = HealthPulse::from_settings(db, &settings)?;
            match command {
                Commands::Serve { listen } => {
                    let addr = listen.unwrap_or(settings.listen_addr);
                    healthpulse::server::serve(std::sync::Arc::new(hp), addr).await?;
                }
                Commands::Token { action } => handle_token(&hp, action).await?,
                Commands::Metric { action } => handle_metric(&hp, action).await?,
                Commands::Analyze { user, json } => {
                    let report = hp.calculate_risk_for(&identity(&user)).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!("{}", report.message);
                        for a in &report.assessments {
                            println!(
                                "  [{:>8}] {:>3}  {}: {}",
                                a.risk_level.as_str(),
                                a.risk_score,
                                a.condition,
                                a.description
                            );
                        }
                    }
                }
                Commands::Assessments { user, current, json } => {
                    let rows = if current {
                        hp.current_assessments(&user).await?
                    } else {
                        hp.assessments(&user).await?
                    };
                    if json {
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    } else if rows.is_empty() {
                        println!("No assessments.");
                    } else {
                        for a in rows {
                            println!(
                                "{}  {:<8} {:>3}  {}",
                                a.assessed_at.format("%Y-%m-%d %H:%M"),
                                a.risk_level.as_str(),
                                a.risk_score,
                                a.condition
                            );
                        }
                    }
                }
                Commands::Alerts { action } => handle_alerts(&hp, action).await?,
                Commands::Dashboard { user, json } => {
                    let summary = hp.dashboard(&user).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        println!(
                            "Health score: {} ({})",
                            summary.health_score, summary.band_label
                        );
                        for r in &summary.readings {
                            println!(
                                "  {:<16} {:>8} {:<6} {:?}",
                                r.metric,
                                show(r.value),
                                r.unit,
                                r.status
                            );
                        }
                        println!("Current risks: {}", summary.current_assessments.len());
                        for a in &summary.current_assessments {
                            println!("  {} ({}, {})", a.condition, a.risk_level, a.risk_score);
                        }
                        println!("Unread alerts: {}", summary.unread_alerts);
                    }
                }
                // handled above
                Commands::Status | Commands::Config { .. } => {}
            }
        }
    }

    Ok(())
}

async fn print_status(db: &healthpulse::Database) -> anyhow::Result<()> {
    let stats = db
        .reader()
        .call(|conn| {
            let count = |table: &str| -> Result<i64, rusqlite::Error> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            };
            let metrics = count("health_metrics")?;
            let assessments = count("risk_assessments")?;
            let alerts = count("alerts")?;
            let users: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT user_id) FROM health_metrics",
                [],
                |row| row.get(0),
            )?;
            let tokens: i64 = conn.query_row(
                "SELECT COUNT(*) FROM api_tokens WHERE revoked_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            let last_analysis: Option<String> = conn
                .query_row::<Option<String>, _, _>(
                    "SELECT MAX(assessed_at) FROM risk_assessments",
                    [],
                    |row| row.get(0),
                )
                .ok()
                .flatten();
            Ok::<_, rusqlite::Error>((metrics, assessments, alerts, users, tokens, last_analysis))
        })
        .await?;

    let (metrics, assessments, alerts, users, tokens, last_analysis) = stats;
    println!("HealthPulse Status");
    println!("  Metrics:       {metrics}");
    println!("  Users:         {users}");
    println!("  Assessments:   {assessments}");
    println!("  Alerts:        {alerts}");
    println!("  Active tokens: {tokens}");
    println!(
        "  Last analysis: {}",
        last_analysis.unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_config(hp: &HealthPulse, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match hp.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            hp.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = hp.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_token(hp: &HealthPulse, action: TokenAction) -> anyhow::Result<()> {
    match action {
        TokenAction::Create { user, label } => {
            let token = hp.issue_token(&user, label.as_deref()).await?;
            println!("{}", token.token);
        }
        TokenAction::List => {
            let tokens = hp.list_tokens().await?;
            if tokens.is_empty() {
                println!("No tokens.");
            }
            for t in tokens {
                let state = match t.revoked_at {
                    Some(at) => format!("revoked {}", at.format("%Y-%m-%d")),
                    None => "active".to_string(),
                };
                println!(
                    "{}  {}  {}  {}",
                    t.token,
                    t.user_id,
                    t.label.as_deref().unwrap_or("-"),
                    state
                );
            }
        }
        TokenAction::Revoke { token } => {
            if hp.revoke_token(&token).await? {
                println!("Revoked.");
            } else {
                println!("Not found or already revoked.");
            }
        }
    }
    Ok(())
}

async fn handle_metric(hp: &HealthPulse, action: MetricAction) -> anyhow::Result<()> {
    match action {
        MetricAction::Log {
            user,
            heart_rate,
            bp,
            temperature,
            stress,
            hydration,
            energy,
            steps,
            sleep_hours,
            sleep_quality,
            recorded_at,
        } => {
            let new = NewHealthMetric {
                heart_rate,
                blood_pressure_systolic: bp.map(|(sys, _)| sys),
                blood_pressure_diastolic: bp.map(|(_, dia)| dia),
                temperature,
                stress_level: stress,
                hydration,
                energy_level: energy,
                steps,
                sleep_hours,
                sleep_quality,
                recorded_at,
            };
            let metric = hp.log_metric(&user, new).await?;
            println!("Logged {}", metric.id);
        }
        MetricAction::List { user, days, json } => {
            let metrics = hp.recent_metrics(&user, days).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else if metrics.is_empty() {
                println!("No metrics in the last {days} days.");
            } else {
                println!("recorded_at        hr    bp       sleep  stress  steps");
                for m in &metrics {
                    let bp = match (m.blood_pressure_systolic, m.blood_pressure_diastolic) {
                        (None, None) => "-".to_string(),
                        (sys, dia) => format!("{}/{}", show(sys), show(dia)),
                    };
                    println!(
                        "{}  {:>4}  {:<7}  {:>5}  {:>6}  {:>5}",
                        m.recorded_at.format("%Y-%m-%d %H:%M"),
                        show(m.heart_rate),
                        bp,
                        show(m.sleep_hours),
                        show(m.stress_level),
                        show(m.steps)
                    );
                }
            }
        }
        MetricAction::Latest { user, json } => match hp.latest_metric(&user).await? {
            Some(m) if json => println!("{}", serde_json::to_string_pretty(&m)?),
            Some(m) => println!(
                "{}  heart_rate={} steps={} sleep_hours={}",
                m.recorded_at.format("%Y-%m-%d %H:%M"),
                show(m.heart_rate),
                show(m.steps),
                show(m.sleep_hours)
            ),
            None => println!("No metrics logged."),
        },
    }
    Ok(())
}

async fn handle_alerts(hp: &HealthPulse, action: AlertAction) -> anyhow::Result<()> {
    match action {
        AlertAction::List { user, json } => {
            let alerts = hp.alerts(&user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
            } else if alerts.is_empty() {
                println!("No alerts.");
            } else {
                for a in alerts {
                    let marker = if a.is_read { " " } else { "*" };
                    println!("{marker} [{}] {}  {} ({})", a.severity, a.title, a.message, a.id);
                }
            }
        }
        AlertAction::Read { user, id } => {
            hp.mark_alert_read(&user, &id).await?;
            println!("Marked read.");
        }
        AlertAction::Create {
            user,
            title,
            message,
            severity,
        } => {
            let severity: AlertSeverity = severity.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let alert = hp.raise_alert(&user, &title, &message, severity).await?;
            println!("Created {}", alert.id);
        }
    }
    Ok(())
}
