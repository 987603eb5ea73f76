//! Subcommand implementations.
use crate::bridge::FileSurface;
use crate::cli::{GenerateArgs, GlobalArgs, SanitizeArgs, SelectArgs, TemplatesArgs};
use crate::config::{config_stub, resolve_config, ConfigOverrides, GenConfig};
use crate::error::PipelineError;
use crate::events::Event;
use crate::lm::build_model_service;
use crate::pipeline::Pipeline;
use crate::sanitize::sanitize;
use crate::selector::select_template;
use crate::templates::{check_store, DirTemplates, EmbeddedTemplates, TemplateId, TemplateStore};
use crate::util::clock_time;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;

fn overrides(global: &GlobalArgs) -> ConfigOverrides {
    ConfigOverrides {
        config_path: global.config.clone(),
        lm_command: global.lm.clone(),
        templates_dir: global.templates.clone(),
    }
}

fn open_store(config: &GenConfig) -> Box<dyn TemplateStore> {
    match &config.templates_dir {
        Some(dir) => Box::new(DirTemplates::new(dir.clone())),
        None => Box::new(EmbeddedTemplates),
    }
}

fn event_line(event: &Event) -> String {
    format!(
        "{} [{}] {}",
        clock_time(event.timestamp_ms),
        event.kind,
        event.message
    )
}

fn join_description(words: &[String]) -> Result<String> {
    let request = words.join(" ");
    if request.trim().is_empty() {
        return Err(PipelineError::EmptyRequest.into());
    }
    Ok(request)
}

pub fn run_generate(global: &GlobalArgs, args: GenerateArgs) -> Result<()> {
    let config = resolve_config(&overrides(global))?;
    let request = join_description(&args.description)?;
    let model = build_model_service(&config)?;
    let surface = FileSurface::new(args.out.clone());
    let pipeline = Pipeline::new(open_store(&config), model, &config, surface);

    let run = pipeline.run(&request)?;
    tracing::info!(
        template = ?run.template(),
        state = %run.state,
        events = run.events.len(),
        "run finished"
    );

    if args.json {
        let text = serde_json::to_string_pretty(&run).context("serialize run")?;
        println!("{text}");
    } else {
        for event in &run.events {
            let line = event_line(event);
            if args.print {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
    }

    if !run.succeeded() {
        let reason = run
            .failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("run ended in state {}", run.state));
        return Err(anyhow!("generation failed: {reason}"));
    }

    if args.print {
        if let Some(document) = run.document() {
            println!("{document}");
        }
    } else if !args.json {
        println!("Wrote {}", pipeline.surface().game_path().display());
        println!("Preview {}", pipeline.surface().preview_path().display());
    }
    Ok(())
}

pub fn run_select(global: &GlobalArgs, args: SelectArgs) -> Result<()> {
    let config = resolve_config(&overrides(global))?;
    let request = join_description(&args.description)?;
    let store = open_store(&config);
    let catalog = store.load_catalog().context("load template catalog")?;
    let model = build_model_service(&config)?;

    let selection = select_template(model.as_ref(), &config.selector.model, &request, &catalog);
    println!("{}", selection.id);
    if let Some(reason) = &selection.fallback {
        eprintln!("fallback: {reason}");
    }
    Ok(())
}

pub fn run_sanitize(args: SanitizeArgs) -> Result<()> {
    let raw = match &args.input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => io::read_to_string(io::stdin()).context("read stdin")?,
    };
    let sanitized = sanitize(&raw);
    println!("{}", sanitized.document);
    if let Some(warning) = &sanitized.warning {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

pub fn run_templates(global: &GlobalArgs, args: TemplatesArgs) -> Result<()> {
    let config = resolve_config(&overrides(global))?;
    let store = open_store(&config);

    if args.check {
        let problems = check_store(store.as_ref())?;
        if problems.is_empty() {
            println!("ok: {} templates", TemplateId::ALL.len());
            return Ok(());
        }
        for problem in &problems {
            println!("{problem}");
        }
        return Err(anyhow!(
            "template store check failed ({} problem(s))",
            problems.len()
        ));
    }

    let text = match &args.show {
        Some(raw) => {
            let id: TemplateId = raw.parse()?;
            store.load(id)?
        }
        None => store.load_catalog()?,
    };
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}

pub fn run_config() -> Result<()> {
    println!("{}", config_stub()?);
    Ok(())
}
