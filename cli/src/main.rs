mod test_runner;

use std::collections::BTreeMap;
use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use runtime::{Engine, EngineConfig, FileReader, RenderError, Rendered, RuntimeValue};
use strata::{CompileError, Compiler, Syntax};

#[derive(Parser)]
#[command(name = "strata", version, about = "Line-oriented template renderer")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Configuration file with a [syntax] table
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template to stdout
    Render(RenderArgs),

    /// Compile a template without running it
    Check(CheckArgs),

    /// Run .test.tpl test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Template file to render
    file: String,

    /// Run parameter as key=value. Repeatable.
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// TOML file holding the run parameters
    #[arg(long = "params", value_name = "FILE")]
    params_file: Option<String>,

    /// Render without a run queue; async calls fail the render
    #[arg(long)]
    sync: bool,

    /// Server path of the template, used to rewrite relative links
    #[arg(long)]
    server_path: Option<String>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Template file to compile
    file: String,

    /// Dump the generated host code
    #[arg(long)]
    code: bool,

    /// Dump the parsed program
    #[arg(long)]
    ast: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.tpl file or a directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

/// Contents of a `strata.toml` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    syntax: Syntax,
    forwarded_params: Option<Vec<String>>,
    server_path: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {}", message);
            process::exit(1);
        }
    };

    match cli.command {
        Command::Render(args) => do_render(args, config, cli.no_color),
        Command::Check(args) => do_check(args, config, cli.no_color),
        Command::Test(args) => {
            let path = Path::new(&args.path);
            if args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, &config, cli.no_color, &args.category);
            process::exit(exit_code);
        }
    }
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path, e))?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| format!("invalid config '{}': {}", path, e))?;
    let mut config = EngineConfig {
        syntax: file.syntax,
        server_path: file.server_path,
        ..EngineConfig::default()
    };
    if let Some(forwarded) = file.forwarded_params {
        config.forwarded_params = forwarded;
    }
    Ok(config)
}

fn color_choice(no_color: bool) -> ColorChoice {
    if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn do_render(args: RenderArgs, mut config: EngineConfig, no_color: bool) {
    let params = match collect_params(&args) {
        Ok(params) => params,
        Err(message) => {
            eprintln!("error: {}", message);
            process::exit(1);
        }
    };
    if args.server_path.is_some() {
        config.server_path = args.server_path.clone();
    }

    let engine = Engine::builder().config(config).reader(FileReader::new()).build();
    let rendered = if args.sync {
        match std::fs::read_to_string(&args.file) {
            Ok(source) => engine.run_source_sync(&source, params),
            Err(e) => {
                eprintln!("error: cannot read '{}': {}", args.file, e);
                process::exit(1);
            }
        }
    } else {
        engine.render_blocking(&args.file, params)
    };

    let Rendered {
        content,
        error,
        aborted,
    } = rendered;
    print!("{}", content);
    if aborted {
        tracing::debug!(file = %args.file, "render aborted");
    }
    if let Some(error) = error {
        report_render_error(&error, &args.file, no_color);
        process::exit(1);
    }
}

fn do_check(args: CheckArgs, config: EngineConfig, no_color: bool) {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let compiler = Compiler::new(config.syntax);
    match compiler.compile(&source, Some(&args.file)) {
        Ok(program) => {
            if args.code {
                println!("{}", program.code);
            }
            if args.ast {
                println!("{:#?}", program.statements);
            }
            if !args.code && !args.ast {
                eprintln!("ok: {} compiled successfully", args.file);
            }
        }
        Err(error) => {
            emit_compile_error(&error, &source, &args.file, no_color);
            process::exit(1);
        }
    }
}

fn report_render_error(error: &RenderError, file: &str, no_color: bool) {
    for error in error.clone().flatten() {
        match &error {
            RenderError::Compile(compile) => {
                let name = compile.identity.clone().unwrap_or_else(|| file.to_string());
                match std::fs::read_to_string(&name) {
                    Ok(source) => emit_compile_error(compile, &source, &name, no_color),
                    Err(_) => eprintln!("compile error: {}", compile),
                }
            }
            RenderError::Runtime(_) => eprintln!("runtime error: {}", error),
            other => eprintln!("error: {}", other),
        }
    }
}

fn emit_compile_error(error: &CompileError, source: &str, name: &str, no_color: bool) {
    let mut files = SimpleFiles::new();
    let file_id = files.add(name.to_string(), source.to_string());
    let diagnostic = error.clone().with_file_id(file_id).to_diagnostic();
    let writer = StandardStream::stderr(color_choice(no_color));
    let config = term::Config::default();
    let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, &diagnostic);
}

fn collect_params(args: &RenderArgs) -> Result<RuntimeValue, String> {
    let mut params = BTreeMap::new();
    if let Some(path) = &args.params_file {
        let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path, e))?;
        let table: toml::Table = toml::from_str(&text).map_err(|e| format!("invalid params '{}': {}", path, e))?;
        for (key, value) in &table {
            params.insert(key.clone(), toml_to_runtime(value));
        }
    }
    for pair in &args.params {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("parameter '{}' is not KEY=VALUE", pair))?;
        params.insert(key.to_string(), parse_arg(value));
    }
    Ok(RuntimeValue::object(params))
}

pub(crate) fn toml_to_runtime(value: &toml::Value) -> RuntimeValue {
    match value {
        toml::Value::Integer(n) => RuntimeValue::Number(*n as f64),
        toml::Value::Float(f) => RuntimeValue::Number(*f),
        toml::Value::Boolean(b) => RuntimeValue::Boolean(*b),
        toml::Value::String(s) => RuntimeValue::String(s.clone()),
        toml::Value::Array(items) => RuntimeValue::array(items.iter().map(toml_to_runtime)),
        toml::Value::Table(table) => RuntimeValue::object(
            table.iter().map(|(k, v)| (k.clone(), toml_to_runtime(v))),
        ),
        other => RuntimeValue::String(other.to_string()),
    }
}

/// Numbers become Number, "true"/"false" become Boolean, everything else is String.
fn parse_arg(s: &str) -> RuntimeValue {
    if let Ok(n) = s.parse::<f64>() {
        return RuntimeValue::Number(n);
    }
    match s {
        "true" => RuntimeValue::Boolean(true),
        "false" => RuntimeValue::Boolean(false),
        _ => RuntimeValue::String(s.to_string()),
    }
}
