use crate::api::{self, grade_single, GradeResponse};
use crate::assessment::{
    wait_for_table, Calculator, Factor, FileTableSource, JsonFileStore, ReferenceTable, Relay,
    RelayReport, RuleKey, SessionContext, SessionSnapshot,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::telemetry::{self, LogTarget};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "PAPS Calculator",
    about = "Grade PAPS fitness assessments from the command line or over HTTP",
    version
)]
struct Cli {
    /// Reference table to load instead of PAPS_TABLE_PATH
    #[arg(long, global = true)]
    table: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Grade a single factor record
    Grade(GradeArgs),
    /// Grade a full session and relay the results
    Session(SessionArgs),
    /// List the reference ranges for one factor and category
    Ranges(RangesArgs),
    /// Print the event catalog per factor
    Events,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
struct ContextArgs {
    /// School stage, e.g. 초, 중, 고
    #[arg(long)]
    school_stage: String,
    /// Grade level within the school stage
    #[arg(long)]
    grade_level: String,
    /// Sex as written in the reference table, e.g. 남 or 여
    #[arg(long)]
    sex: String,
}

impl From<ContextArgs> for SessionContext {
    fn from(args: ContextArgs) -> Self {
        SessionContext::new(args.school_stage, args.grade_level, args.sex)
    }
}

#[derive(Args, Debug)]
struct GradeArgs {
    #[command(flatten)]
    context: ContextArgs,
    /// Factor label or slug, e.g. 순발력 or power
    #[arg(long)]
    factor: Factor,
    /// Test event (defaults to the factor's first event)
    #[arg(long)]
    event: Option<String>,
    /// Measured record value
    #[arg(long)]
    record: String,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SessionArgs {
    #[command(flatten)]
    context: ContextArgs,
    /// Event choice as FACTOR=EVENT (repeatable)
    #[arg(long = "event", value_parser = parse_assignment)]
    events: Vec<Assignment>,
    /// Record entry as FACTOR=VALUE (repeatable)
    #[arg(long = "record", value_parser = parse_assignment)]
    records: Vec<Assignment>,
    /// JSON file mirroring the relayed results (falls back to PAPS_RESULTS_STORE)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Relay even when the total score is zero
    #[arg(long)]
    publish: bool,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RangesArgs {
    #[command(flatten)]
    context: ContextArgs,
    /// Factor label or slug
    #[arg(long)]
    factor: Factor,
    /// Test event (defaults to the factor's first event)
    #[arg(long)]
    event: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    factor: Factor,
    value: String,
}

fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (factor, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FACTOR=VALUE, got '{raw}'"))?;
    let factor = factor.parse::<Factor>().map_err(|err| err.to_string())?;
    Ok(Assignment {
        factor,
        value: value.trim().to_string(),
    })
}

pub async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => api::run(args, cli.table).await,
        Command::Events => {
            print_events();
            Ok(())
        }
        Command::Grade(args) => {
            let table = load_table(cli.table).await?;
            run_grade(&table, args)
        }
        Command::Session(args) => {
            let config = AppConfig::load()?;
            let table = load_table(cli.table).await?;
            let store = args.store.clone().or(config.relay.store_path);
            run_session(table, args, store)
        }
        Command::Ranges(args) => {
            let table = load_table(cli.table).await?;
            run_ranges(&table, args);
            Ok(())
        }
    }
}

async fn load_table(table_override: Option<PathBuf>) -> Result<Arc<ReferenceTable>, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(path) = table_override {
        config.table.path = path;
    }
    telemetry::init(&config.telemetry, LogTarget::Stderr)?;

    let source = FileTableSource::new(config.table.path.clone());
    let table = wait_for_table(&source, config.table.retry_policy()).await?;
    Ok(Arc::new(table))
}

fn run_grade(table: &ReferenceTable, args: GradeArgs) -> Result<(), AppError> {
    let context = SessionContext::from(args.context);
    let graded = grade_single(table, &context, args.factor, args.event, args.record);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&graded)?);
    } else {
        render_grade(&context, &graded);
    }
    Ok(())
}

fn run_session(
    table: Arc<ReferenceTable>,
    args: SessionArgs,
    store: Option<PathBuf>,
) -> Result<(), AppError> {
    let mut calculator = Calculator::new(table);
    calculator.set_context(args.context.into());
    for Assignment { factor, value } in args.events {
        calculator.select_event(factor, value);
    }
    for Assignment { factor, value } in args.records {
        calculator.enter_record(factor, value);
    }

    let report = match store {
        Some(path) => {
            let relay = Relay::new().with_local_store(Arc::new(JsonFileStore::new(path)));
            let mut calculator_with_relay = calculator.with_relay(Arc::new(relay));
            let report = if args.publish || calculator_with_relay.total().total_score > 0 {
                calculator_with_relay.publish().cloned()
            } else {
                None
            };
            calculator = calculator_with_relay;
            report
        }
        None => None,
    };

    let snapshot = calculator.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        render_session(&snapshot, report.as_ref());
    }
    Ok(())
}

fn run_ranges(table: &ReferenceTable, args: RangesArgs) {
    let context = SessionContext::from(args.context);
    let event = args
        .event
        .unwrap_or_else(|| args.factor.default_event().to_string());
    let key = RuleKey::new(args.factor, &event, &context);

    println!(
        "{} / {} ({} {}학년 {})",
        key.factor, key.event, key.school_stage, key.grade_level, key.sex
    );

    let mut any = false;
    for rule in table.candidates(&key) {
        any = true;
        let note = if rule.range.is_none() {
            " (unparseable range)"
        } else {
            ""
        };
        println!(
            "- {}: {}점, {}{}",
            rule.record_range, rule.score, rule.grade, note
        );
    }
    if !any {
        println!("No reference ranges for this category");
    }
}

fn print_events() {
    println!("Event catalog");
    for factor in Factor::ordered() {
        println!("- {} ({}): {}", factor, factor.slug(), factor.events().join(", "));
    }
}

fn render_grade(context: &SessionContext, graded: &GradeResponse) {
    println!(
        "{} / {} ({} {}학년 {})",
        graded.factor, graded.event, context.school_stage, context.grade_level, context.sex
    );
    let record = graded
        .record
        .map(|value| value.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("Record: {record}");
    println!("State: {}", graded.state);
    if let Some(candidates) = graded.candidates {
        println!("No range matched ({candidates} rules for this category)");
    }
    println!("Result: {}", graded.tooltip);
    println!("Chart value: {}", graded.chart_value);
}

fn render_session(snapshot: &SessionSnapshot, report: Option<&RelayReport>) {
    let context = &snapshot.session_context;
    println!(
        "PAPS session: {} {}학년 {}",
        context.school_stage, context.grade_level, context.sex
    );

    println!("\nFactors");
    for view in &snapshot.factors {
        let record = view
            .record
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "- {} | {} | record {} | {} | {} | chart {}",
            view.factor, view.event, record, view.state, view.tooltip, view.chart_value
        );
    }

    let total = &snapshot.total;
    println!(
        "\nTotal: {}점, {} ({} of 5 factors answered)",
        total.total_score, total.total_grade, total.answered_factors
    );

    match report {
        Some(report) if report.is_clean() => {
            println!("Relayed results to {} channel(s)", report.outcomes.len())
        }
        Some(report) => {
            println!("Relay finished with failures");
            for failure in report.failures() {
                println!(
                    "- {} {:?}: {}",
                    failure.target,
                    failure.channel,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        None => println!("Results not relayed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_factor_assignments() {
        let assignment = parse_assignment("순발력= 8.5").expect("valid assignment");
        assert_eq!(assignment.factor, Factor::Power);
        assert_eq!(assignment.value, "8.5");

        let by_slug = parse_assignment("flexibility=앉아윗몸앞으로굽히기").expect("slug");
        assert_eq!(by_slug.factor, Factor::Flexibility);
    }

    #[test]
    fn rejects_malformed_assignments() {
        assert!(parse_assignment("순발력").is_err());
        assert!(parse_assignment("speed=8.5").is_err());
    }

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["paps-calculator"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn session_command_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "paps-calculator",
            "session",
            "--school-stage",
            "중",
            "--grade-level",
            "1",
            "--sex",
            "남",
            "--record",
            "순발력=8.5",
            "--record",
            "비만=21.3",
            "--event",
            "power=50m달리기",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Session(args)) => {
                assert_eq!(args.records.len(), 2);
                assert_eq!(args.records[1].factor, Factor::BodyComposition);
                assert_eq!(args.events[0].value, "50m달리기");
                assert!(!args.json);
            }
            other => panic!("expected session command, got {other:?}"),
        }
    }
}
