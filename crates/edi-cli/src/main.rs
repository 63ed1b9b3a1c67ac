//! # edi-cli
//!
//! Command line front end for the UN/EDIFACT parser.
//!
//! `edi parse` maps an interchange and writes the result as XML, as a JSON
//! tree or as the raw event stream. `edi check` runs the same parse and only
//! reports what it found.
//!
//! Exit codes: 0 success, 1 validation errors, 2 unreadable or malformed
//! input, 3 configuration problems (config file, unknown message types).

mod config;
mod output;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use edi_adapter_edifact::{
    Error as ParseError, InterchangeParser, ParseOutcome, ParserSettings, SyntaxVersion,
    parse_message_stream,
};
use edi_ir::{EventRecorder, EventSink, Node, TreeBuilder};
use edi_validation::ValidationPolicy;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, EngineConfig, MappingSources};
use crate::output::{Discard, OutputFormat, XmlWriter};

const EXIT_INVALID: u8 = 1;
const EXIT_PARSE: u8 = 2;
const EXIT_CONFIG: u8 = 3;

#[derive(Parser)]
#[command(name = "edi")]
#[command(about = "UN/EDIFACT interchange parser")]
#[command(version)]
struct Cli {
    /// Path to a YAML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an interchange and write the mapped document
    Parse {
        #[command(flatten)]
        parse: ParseArgs,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,

        /// Indent the output
        #[arg(long)]
        pretty: bool,

        /// Output file (default stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse an interchange and report messages and validation errors
    Check {
        #[command(flatten)]
        parse: ParseArgs,
    },
}

#[derive(Args)]
struct ParseArgs {
    /// Input file, or '-' for stdin
    input: PathBuf,

    /// Directory searched for mapping models
    #[arg(short, long = "mappings")]
    mappings: Vec<PathBuf>,

    /// Mapping model file loaded up front
    #[arg(long = "model-file")]
    model_files: Vec<PathBuf>,

    /// Model archive (directory with a mapping-models.lst manifest)
    #[arg(long = "archive")]
    archives: Vec<PathBuf>,

    /// Map a message stream without control blocks against this model
    /// (e.g. ORDERS:D:96A:UN)
    #[arg(long)]
    message: Option<String>,

    /// Encoding used until an interchange header declares one
    #[arg(long)]
    encoding: Option<String>,

    /// Force syntax version 3 or 4
    #[arg(long, value_parser = parse_syntax_version)]
    syntax_version: Option<SyntaxVersion>,

    /// Skip all validation
    #[arg(long)]
    no_validation: bool,

    /// Collect validation errors instead of stopping at the first
    #[arg(long)]
    collect: bool,

    /// Stop after this many collected validation errors
    #[arg(long)]
    max_errors: Option<usize>,

    #[arg(long)]
    ignore_newlines: bool,

    #[arg(long)]
    ignore_empty_nodes: bool,

    #[arg(long)]
    ignore_unmapped_segments: bool,
}

impl ParseArgs {
    /// Flags win over the configuration file.
    fn settings(&self, mut settings: ParserSettings) -> ParserSettings {
        if let Some(encoding) = &self.encoding {
            settings.encoding = Some(encoding.clone());
        }
        if self.syntax_version.is_some() {
            settings.syntax_version = self.syntax_version;
        }
        if self.no_validation {
            settings.validation.enabled = false;
        }
        if self.collect {
            settings.validation.policy = ValidationPolicy::Collect;
        }
        if let Some(max_errors) = self.max_errors {
            settings.validation.max_errors = max_errors;
        }
        settings.ignore_newlines |= self.ignore_newlines;
        settings.ignore_empty_nodes |= self.ignore_empty_nodes;
        settings.ignore_unmapped_segments |= self.ignore_unmapped_segments;
        settings
    }

    fn sources(&self) -> MappingSources {
        MappingSources {
            files: self.model_files.clone(),
            archives: self.archives.clone(),
            directories: self.mappings.clone(),
        }
    }
}

fn parse_syntax_version(value: &str) -> Result<SyntaxVersion, String> {
    let number: u8 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a syntax version"))?;
    SyntaxVersion::try_from(number)
}

struct Engine {
    parser: InterchangeParser,
    message: Option<String>,
}

impl Engine {
    fn new(config: EngineConfig, args: &ParseArgs) -> Self {
        let mut sources = config.mappings;
        sources.prepend(args.sources());
        let settings = args.settings(config.parser);
        debug!("Parser settings: {:?}", settings);

        Self {
            parser: InterchangeParser::new(Arc::new(sources.registry())).with_settings(settings),
            message: args.message.clone(),
        }
    }

    fn parse(&self, input: impl Read, sink: &mut dyn EventSink) -> anyhow::Result<ParseOutcome> {
        let outcome = match &self.message {
            Some(lookup_name) => {
                let model = self.parser.registry().get(lookup_name)?;
                parse_message_stream(&model, input, self.parser.settings(), sink)?
            }
            None => self.parser.parse(input, sink)?,
        };
        Ok(outcome)
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    root: &'a Node,
    #[serde(flatten)]
    outcome: &'a ParseOutcome,
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file =
        File::open(path).with_context(|| format!("cannot open input {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create output {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

fn write_json<T: Serialize + ?Sized>(
    mut out: Box<dyn Write>,
    value: &T,
    pretty: bool,
) -> anyhow::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn parse_command(
    engine: &Engine,
    args: &ParseArgs,
    format: OutputFormat,
    pretty: bool,
    output: Option<&Path>,
) -> anyhow::Result<ParseOutcome> {
    let input = open_input(&args.input)?;
    let out = open_output(output)?;

    let outcome = match format {
        OutputFormat::Xml => {
            let mut writer = XmlWriter::new(out, pretty);
            engine.parse(input, &mut writer)?
        }
        OutputFormat::Json => {
            let mut tree = TreeBuilder::new();
            let outcome = engine.parse(input, &mut tree)?;
            let root = tree.into_root()?;
            write_json(
                out,
                &JsonDocument {
                    root: &root,
                    outcome: &outcome,
                },
                pretty,
            )?;
            outcome
        }
        OutputFormat::Events => {
            let mut recorder = EventRecorder::new();
            let outcome = engine.parse(input, &mut recorder)?;
            write_json(out, recorder.events(), pretty)?;
            outcome
        }
    };
    Ok(outcome)
}

fn check_command(engine: &Engine, args: &ParseArgs) -> anyhow::Result<ParseOutcome> {
    let input = open_input(&args.input)?;
    let outcome = engine.parse(input, &mut Discard)?;

    let mut stdout = io::stdout().lock();
    for interchange in &outcome.interchanges {
        writeln!(
            stdout,
            "interchange {} from {} to {} (syntax {}, {})",
            interchange.control_ref,
            interchange.sender,
            interchange.recipient,
            interchange.syntax_identifier.identifier,
            interchange.encoding
        )?;
    }
    for message in outcome.all_messages() {
        writeln!(
            stdout,
            "message {} {} segments={}",
            message.lookup_name, message.reference, message.segment_count
        )?;
    }
    Ok(outcome)
}

fn run(cli: &Cli) -> anyhow::Result<ParseOutcome> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let outcome = match &cli.command {
        Commands::Parse {
            parse,
            format,
            pretty,
            output,
        } => {
            let engine = Engine::new(config, parse);
            parse_command(&engine, parse, *format, *pretty, output.as_deref())
                .with_context(|| format!("parsing {}", parse.input.display()))?
        }
        Commands::Check { parse } => {
            let engine = Engine::new(config, parse);
            check_command(&engine, parse)
                .with_context(|| format!("checking {}", parse.input.display()))?
        }
    };
    Ok(outcome)
}

fn exit_status(error: &anyhow::Error) -> u8 {
    if error.downcast_ref::<ConfigError>().is_some()
        || error.downcast_ref::<edi_schema::Error>().is_some()
    {
        return EXIT_CONFIG;
    }
    match error.downcast_ref::<ParseError>() {
        Some(ParseError::Validation(_)) => EXIT_INVALID,
        Some(ParseError::Configuration { .. }) => EXIT_CONFIG,
        _ => EXIT_PARSE,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(outcome) => {
            for error in &outcome.validation_errors {
                eprintln!("WARNING: {error}");
            }
            eprintln!(
                "Parse summary: messages={}, warnings={}",
                outcome.message_count(),
                outcome.validation_errors.len()
            );
            info!("Read {} segments", outcome.segment_count);
            if outcome.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INVALID)
            }
        }
        Err(error) => {
            eprintln!("ERROR: {error:#}");
            ExitCode::from(exit_status(&error))
        }
    }
}
