//! canvass CLI entrypoint.

use canvass::cli::commands::{
    Cli, Commands, DbCommands, OrgCommands, ServeArgs, SurveyCommands,
};
use canvass::cli::output::{create_table, output, output_error, CliResponse, OutputFormat};
use canvass::core::error::ExitCode;
use canvass::core::model::{Organization, Survey};
use canvass::core::registry::Registry;
use canvass::server::{serve, ServeConfig};
use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::process;

fn parse_format_from_args(args: &[OsString]) -> OutputFormat {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let s = arg.to_string_lossy();

        if s == "-f" || s == "--format" {
            if let Some(value) = iter.next() {
                return parse_format_value(&value.to_string_lossy());
            }
        }

        if let Some(value) = s.strip_prefix("--format=") {
            return parse_format_value(value);
        }
    }

    OutputFormat::Table
}

fn parse_format_value(value: &str) -> OutputFormat {
    let v = value.to_lowercase();
    if v == "json" {
        OutputFormat::Json
    } else if v == "yaml" || v == "yml" {
        OutputFormat::Yaml
    } else {
        OutputFormat::Table
    }
}

fn output_version(format: OutputFormat) {
    let version = env!("CARGO_PKG_VERSION");
    match format {
        OutputFormat::Table => {
            println!("canvass {version}");
        }
        OutputFormat::Json => {
            let response = CliResponse::success(serde_json::json!({
                "name": "canvass",
                "version": version
            }));
            if let Ok(json) = serde_json::to_string_pretty(&response) {
                println!("{json}");
            }
        }
        OutputFormat::Yaml => {
            let response = CliResponse::success(serde_json::json!({
                "name": "canvass",
                "version": version
            }));
            if let Ok(yaml) = serde_yaml::to_string(&response) {
                print!("{yaml}");
            }
        }
    }
}

fn handle_clap_error(err: &clap::Error, format: OutputFormat) -> ExitCode {
    match err.kind() {
        ErrorKind::DisplayHelp => {
            print!("{}", err.render());
            ExitCode::Success
        }
        ErrorKind::DisplayVersion => {
            output_version(format);
            ExitCode::Success
        }
        _ => {
            eprintln!("{}", err.render());
            ExitCode::Error
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<OsString> = std::env::args_os().collect();
    let format = parse_format_from_args(&args);

    match Cli::try_parse_from(&args) {
        Ok(cli) => process::exit(i32::from(run(cli))),
        Err(e) => process::exit(i32::from(handle_clap_error(&e, format))),
    }
}

fn run(cli: Cli) -> ExitCode {
    let format = cli.format;

    match cli.command {
        None | Some(Commands::Version) => {
            output_version(format);
            ExitCode::Success
        }
        Some(Commands::Serve(args)) => handle_serve(&args, format),
        Some(Commands::Org(cmd)) => handle_org(cmd, format),
        Some(Commands::Survey(cmd)) => handle_survey(cmd, format),
        Some(Commands::Db(cmd)) => handle_db(cmd, format),
    }
}

fn get_registry(format: OutputFormat) -> Option<Registry> {
    match Registry::open() {
        Ok(registry) => Some(registry),
        Err(e) => {
            let _ = output_error(&e, format);
            None
        }
    }
}

fn handle_serve(args: &ServeArgs, format: OutputFormat) -> ExitCode {
    let config = ServeConfig {
        host: args.host.clone(),
        port: args.port,
    };
    match serve(&config) {
        Ok(()) => ExitCode::Success,
        Err(e) => output_error(&e, format),
    }
}

fn org_row(org: &Organization) -> Vec<String> {
    vec![
        org.id.to_string(),
        org.name.clone(),
        org.created_at.format("%Y-%m-%d %H:%M").to_string(),
    ]
}

fn survey_row(survey: &Survey) -> Vec<String> {
    vec![
        survey.id.to_string(),
        survey.title.clone(),
        survey.questions.len().to_string(),
        if survey.is_active { "active" } else { "inactive" }.to_string(),
        survey.updated_at.format("%Y-%m-%d %H:%M").to_string(),
    ]
}

fn print_rows<T: serde::Serialize>(
    rows: &[T],
    headers: &[&str],
    to_row: fn(&T) -> Vec<String>,
    format: OutputFormat,
) -> ExitCode {
    match format {
        OutputFormat::Table => {
            let mut table = create_table(headers);
            for row in rows {
                table.add_row(to_row(row));
            }
            println!("{table}");
            ExitCode::Success
        }
        _ => {
            if let Err(err) = output(rows, format) {
                eprintln!("Failed to render output: {err}");
                return ExitCode::Error;
            }
            ExitCode::Success
        }
    }
}

fn handle_org(cmd: OrgCommands, format: OutputFormat) -> ExitCode {
    let Some(registry) = get_registry(format) else {
        return ExitCode::Error;
    };

    match cmd {
        OrgCommands::Add(args) => {
            let mut created = Vec::new();
            for name in &args.names {
                match registry.create_organization(name) {
                    Ok(org) => created.push(org),
                    Err(e) => return output_error(&e, format),
                }
            }
            print_rows(&created, &["ID", "Name", "Created"], org_row, format)
        }
        OrgCommands::List => match registry.list_organizations() {
            Ok(orgs) => print_rows(&orgs, &["ID", "Name", "Created"], org_row, format),
            Err(e) => output_error(&e, format),
        },
    }
}

fn handle_survey(cmd: SurveyCommands, format: OutputFormat) -> ExitCode {
    let Some(registry) = get_registry(format) else {
        return ExitCode::Error;
    };

    match cmd {
        SurveyCommands::List => match registry.all_surveys() {
            Ok(surveys) => print_rows(
                &surveys,
                &["ID", "Title", "Questions", "Status", "Updated"],
                survey_row,
                format,
            ),
            Err(e) => output_error(&e, format),
        },
    }
}

fn handle_db(cmd: DbCommands, format: OutputFormat) -> ExitCode {
    let Some(registry) = get_registry(format) else {
        return ExitCode::Error;
    };

    match cmd {
        DbCommands::Clear(args) => {
            if !args.yes {
                eprintln!("Refusing to clear state without --yes");
                return ExitCode::Error;
            }
            match registry.clear_state() {
                Ok(()) => {
                    if format == OutputFormat::Table {
                        println!("State cleared.");
                    } else {
                        let _ = output(serde_json::json!({ "cleared": true }), format);
                    }
                    ExitCode::Success
                }
                Err(e) => output_error(&e, format),
            }
        }
    }
}
