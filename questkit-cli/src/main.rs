use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use questkit_core::batch::{collect_scripts, load_scripts, read_sources, BatchFailure};
use questkit_core::cfg::build_cfg;
use questkit_core::lint::{apply_fixes, LintReport, Linter};
use questkit_core::logging::{init_logging, level_for_verbosity};
use questkit_core::optimizer::OptimizationReport;
use questkit_core::output::write_atomic;
use questkit_core::params::ParameterDatabase;
use questkit_core::validate::{ValidationReport, Validator, ValidatorConfig};
use questkit_core::{parse_script, parse_script_recovering, CharTable, DialogStore, ParseOptions, QuestError, Result, ToolConfig};

#[derive(Debug, Parser)]
#[command(name = "QuestKit-CLI", version, about = "Dialog and event-script toolkit for SNES RPG ROMs")]
struct Args {
    /// Config file; defaults to <config dir>/QuestKit/questkit.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode every dialog behind the pointer table.
    Extract {
        #[arg(long)]
        rom: PathBuf,
        #[arg(long)]
        table: PathBuf,
        #[arg(long, value_enum, default_value_t = ExtractFormat::Json)]
        format: ExtractFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Re-encode edited dialogs from a JSON export and write a new ROM.
    Patch {
        #[arg(long)]
        rom: PathBuf,
        #[arg(long)]
        table: PathBuf,
        /// JSON produced by `extract`.
        #[arg(long)]
        dialogs: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    Lint {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Apply automatic fixes in place.
        #[arg(long)]
        fix: bool,
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        strict: bool,
        /// Annotation output; exit code 1 when any error is found.
        #[arg(long)]
        ci: bool,
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    /// Control-flow graph of one dialog block.
    Cfg {
        file: PathBuf,
        #[arg(long)]
        dialog: Option<String>,
        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Parameter value database over a set of scripts.
    Params {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = ParamsFormat::Json)]
        format: ParamsFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Optimize {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = OptimizeFormat::Text)]
        format: OptimizeFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Translation memory from a source script and its translation.
    Tm {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[arg(long, value_enum, default_value_t = TmFormat::Tmx)]
        format: TmFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExtractFormat {
    Json,
    Text,
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
    Markdown,
    Annotations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OptimizeFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GraphFormat {
    Dot,
    Mermaid,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ParamsFormat {
    Json,
    Csv,
    Markdown,
    Sqlite,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TmFormat {
    Tmx,
    Xliff,
    Json,
    Csv,
    Terms,
    Markdown,
}

fn config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("QuestKit");
    base.push("questkit.json");
    Some(base)
}

/// Write to `output` when given, stdout otherwise.
fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            write_atomic(path, text.as_bytes())?;
            info!("wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn report_failures(failures: &[BatchFailure]) {
    for f in failures {
        eprintln!("Error: {}: {}", f.path, f.error);
    }
}

/// Returns false when the run should exit with status 1.
fn run(args: Args) -> Result<bool> {
    let config = ToolConfig::load_or_default(args.config.as_deref(), config_path())?;

    match args.command {
        Command::Extract {
            rom,
            table,
            format,
            output,
        } => {
            let table = CharTable::load(&table, &config.table)?;
            let mut store = DialogStore::new(fs::read(&rom)?, config.pointers, &table);
            let count = store.extract_all()?;
            info!("extracted {count} dialogs from {}", rom.display());
            let text = match format {
                ExtractFormat::Json => store.export_json()?,
                ExtractFormat::Stats => serde_json::to_string_pretty(&store.statistics()).map_err(QuestError::from)?,
                ExtractFormat::Text => store
                    .entries()
                    .map(|e| format!("{:04} {:#08X} {}", e.id, e.address, e.text))
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            emit(output.as_deref(), &text)?;
            Ok(true)
        }

        Command::Patch {
            rom,
            table,
            dialogs,
            output,
        } => {
            let table = CharTable::load(&table, &config.table)?;
            let mut store = DialogStore::new(fs::read(&rom)?, config.pointers, &table);
            store.extract_all()?;
            let applied = store.import_json(&fs::read_to_string(&dialogs)?)?;
            store.save_rom(&output)?;
            println!("Patched {applied} dialog(s) into {}", output.display());
            Ok(true)
        }

        Command::Lint { paths, fix, format } => {
            let files = collect_scripts(&paths, &config.script_extensions)?;
            let (loaded, failures) = load_scripts(&files, &ParseOptions::default());
            report_failures(&failures);

            let linter = Linter::new(config.lint.clone());
            let mut report = LintReport::new();
            for file in &loaded {
                let issues = linter.lint(&file.name(), &file.script);
                if fix {
                    let (fixed, applied) = apply_fixes(&file.source, &issues);
                    if applied > 0 {
                        write_atomic(&file.path, fixed.as_bytes())?;
                        println!("Applied {applied} fix(es) to {}", file.name());
                    }
                }
                report.add(&file.name(), &file.script, issues);
            }

            let text = match format {
                ReportFormat::Json => report.to_json()?,
                ReportFormat::Annotations => report.to_annotations(),
                ReportFormat::Text => report.to_text(),
                ReportFormat::Markdown => report.to_markdown(),
            };
            emit(None, &text)?;
            Ok(failures.is_empty())
        }

        Command::Validate {
            paths,
            strict,
            ci,
            format,
        } => {
            let files = collect_scripts(&paths, &config.script_extensions)?;
            let (sources, failures) = read_sources(&files);
            report_failures(&failures);

            let validator = Validator::new(ValidatorConfig {
                strict: strict || config.validator.strict,
            });
            let report = ValidationReport {
                results: sources
                    .iter()
                    .map(|(path, src)| validator.validate(&path.display().to_string(), src))
                    .collect(),
            };

            let format = if ci { ReportFormat::Annotations } else { format };
            let text = match format {
                ReportFormat::Text => report.to_text(),
                ReportFormat::Json => report.to_json()?,
                ReportFormat::Markdown => report.to_markdown(),
                ReportFormat::Annotations => report.to_annotations(),
            };
            emit(None, &text)?;
            Ok(failures.is_empty() && (!ci || report.is_valid()))
        }

        Command::Cfg {
            file,
            dialog,
            format,
            output,
        } => {
            let src = fs::read_to_string(&file)?;
            let (script, errors) = parse_script_recovering(&src, &ParseOptions::default());
            for err in &errors {
                eprintln!("Warning: {}: {err}", file.display());
            }
            let blocks: Vec<_> = script
                .dialogs
                .iter()
                .filter(|d| dialog.as_deref().map_or(true, |id| d.id == id))
                .collect();
            if blocks.is_empty() {
                return Err(QuestError::Config(format!(
                    "no dialog '{}' in {}",
                    dialog.unwrap_or_default(),
                    file.display()
                )));
            }
            let graphs: Vec<_> = blocks.into_iter().map(build_cfg).collect();
            let text = match format {
                GraphFormat::Dot => graphs.iter().map(|g| g.to_dot()).collect::<Vec<_>>().join("\n"),
                GraphFormat::Mermaid => graphs.iter().map(|g| g.to_mermaid()).collect::<Vec<_>>().join("\n"),
                GraphFormat::Json => serde_json::to_string_pretty(&graphs).map_err(QuestError::from)?,
            };
            emit(output.as_deref(), &text)?;
            Ok(true)
        }

        Command::Params { paths, format, output } => {
            let files = collect_scripts(&paths, &config.script_extensions)?;
            let (loaded, failures) = load_scripts(&files, &ParseOptions::default());
            report_failures(&failures);
            let names: Vec<String> = loaded.iter().map(|f| f.name()).collect();
            let corpus: Vec<_> = names.iter().map(String::as_str).zip(loaded.iter().map(|f| &f.script)).collect();
            let db = ParameterDatabase::build(&corpus);

            if format == ParamsFormat::Sqlite {
                let path = output.ok_or_else(|| QuestError::Config("--output is required for sqlite".to_string()))?;
                db.export_sqlite(&path)?;
                println!("Wrote parameter database to {}", path.display());
            } else {
                let text = match format {
                    ParamsFormat::Csv => db.to_csv(),
                    ParamsFormat::Markdown => db.to_markdown(),
                    _ => db.to_json()?,
                };
                emit(output.as_deref(), &text)?;
            }
            Ok(failures.is_empty())
        }

        Command::Optimize { paths, format, output } => {
            let files = collect_scripts(&paths, &config.script_extensions)?;
            let (loaded, failures) = load_scripts(&files, &ParseOptions::default());
            report_failures(&failures);
            let names: Vec<String> = loaded.iter().map(|f| f.name()).collect();
            let corpus: Vec<_> = names.iter().map(String::as_str).zip(loaded.iter().map(|f| &f.script)).collect();
            let report: OptimizationReport = config.optimizer.analyze(&corpus);

            let text = match format {
                OptimizeFormat::Text => report.to_text(),
                OptimizeFormat::Json => report.to_json()?,
            };
            emit(output.as_deref(), &text)?;
            Ok(failures.is_empty())
        }

        Command::Tm {
            source,
            target,
            format,
            output,
        } => {
            let options = ParseOptions::default();
            let src = parse_script(&fs::read_to_string(&source)?, &options)?;
            let tgt = parse_script(&fs::read_to_string(&target)?, &options)?;
            let mut builder = config.tm.builder();
            builder.original = source.display().to_string();
            let tm = builder.build(&src, &tgt);
            info!(
                "{} translation units, {:.1}% coverage",
                tm.metrics.translated_segments, tm.metrics.coverage_percent
            );

            let text = match format {
                TmFormat::Tmx => tm.to_tmx(),
                TmFormat::Xliff => tm.to_xliff(),
                TmFormat::Json => tm.to_json()?,
                TmFormat::Csv => tm.to_csv(),
                TmFormat::Terms => tm.terminology_csv(),
                TmFormat::Markdown => tm.to_markdown(),
            };
            emit(output.as_deref(), &text)?;
            Ok(true)
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(level_for_verbosity(args.verbose), args.log_file.as_deref()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
