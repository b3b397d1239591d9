use deepres_demux::Mode;
use deepres_llm::{ProviderError, StreamRequest, create_provider};
use snafu::{ResultExt, Snafu};

use crate::cli::{AskArgs, Cli, Command, ConfigAction};
use crate::session::{SessionError, TerminalSink, format_report, run_turn, write_artifact};
use crate::settings::{Settings, SettingsError, SettingsStore};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("research turn failed on `{stage}`: {source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to render settings on `{stage}`: {source}"))]
    RenderSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

pub async fn run(cli: Cli) -> AppResult<()> {
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };

    match cli.command {
        Command::Ask(args) => ask(&store, args).await,
        Command::Config { action } => config(&store, action),
    }
}

/// Applies per-invocation overrides on top of the loaded settings.
pub fn effective_settings(
    base: &Settings,
    args: &AskArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = base.clone();

    if let Some(provider_id) = &args.provider {
        let provider_id = provider_id.trim().to_ascii_lowercase();
        if provider_id != settings.provider_id {
            // Keys and endpoints belong to the configured provider.
            settings = Settings {
                provider_id,
                api_key: String::new(),
                endpoint: String::new(),
                model: String::new(),
                ..settings
            }
            .normalized()
            .with_env_api_key(lookup);
        }
    }

    if let Some(model) = &args.model {
        settings.model = model.trim().to_string();
    }
    if args.no_search {
        settings.search_grounding = false;
    }

    settings
}

async fn ask(store: &SettingsStore, args: AskArgs) -> AppResult<()> {
    let settings = effective_settings(&store.settings(), &args, |name| std::env::var(name).ok());
    let provider = create_provider(settings.to_provider_config()).context(CreateProviderSnafu {
        stage: "create-provider",
    })?;

    let mut request = StreamRequest::new(settings.model_id(), args.prompt_text())
        .with_search_grounding(settings.search_grounding);
    if let Some(temperature) = settings.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = settings.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let mut sink = TerminalSink::new(args.json);
    let result = run_turn(provider.as_ref(), request, &mut sink)
        .await
        .context(SessionSnafu { stage: "run-turn" })?;
    if let Some(error) = sink.take_failure() {
        return Err(error).context(SessionSnafu {
            stage: "emit-snapshots",
        });
    }

    let artifact_path = args
        .artifact_out
        .as_deref()
        .filter(|_| result.mode == Mode::Artifact);
    if let Some(path) = artifact_path {
        write_artifact(&result, path).context(SessionSnafu {
            stage: "write-artifact",
        })?;
    }

    if !args.json {
        print!("{}", format_report(&result, artifact_path));
    }
    Ok(())
}

fn config(store: &SettingsStore, action: ConfigAction) -> AppResult<()> {
    match action {
        ConfigAction::Path => println!("{}", store.config_path().display()),
        ConfigAction::Show => {
            let rendered = serde_json::to_string_pretty(&store.settings().redacted()).context(
                RenderSettingsSnafu {
                    stage: "render-settings",
                },
            )?;
            println!("{rendered}");
        }
        ConfigAction::Init => {
            if store.config_path().exists() {
                println!(
                    "settings already exist at {}",
                    store.config_path().display()
                );
            } else {
                store.update(Settings::default()).context(SettingsSnafu {
                    stage: "init-settings",
                })?;
                println!("wrote {}", store.config_path().display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn ask_args(provider: Option<&str>, model: Option<&str>, no_search: bool) -> AskArgs {
        AskArgs {
            prompt: vec!["q".to_string()],
            json: false,
            artifact_out: None::<PathBuf>,
            provider: provider.map(str::to_string),
            model: model.map(str::to_string),
            no_search,
        }
    }

    #[test]
    fn overrides_apply_on_top_of_settings() {
        let base = Settings {
            api_key: "gemini-key".to_string(),
            ..Settings::default()
        };

        let args = ask_args(None, Some(" gemini-2.5-pro "), true);
        let settings = effective_settings(&base, &args, |_| None);
        assert_eq!(settings.api_key, "gemini-key");
        assert_eq!(settings.model_id(), "gemini-2.5-pro");
        assert!(!settings.search_grounding);
    }

    #[test]
    fn switching_provider_resolves_its_own_key() {
        let base = Settings {
            api_key: "gemini-key".to_string(),
            endpoint: "https://proxy.example".to_string(),
            ..Settings::default()
        };
        let lookup = |name: &str| (name == "OPENAI_API_KEY").then(|| "openai-key".to_string());

        let settings = effective_settings(&base, &ask_args(Some("OpenAI"), None, false), lookup);
        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.api_key, "openai-key");
        assert_eq!(settings.endpoint, "");
        assert!(settings.search_grounding);

        let same = effective_settings(&base, &ask_args(Some("gemini"), None, false), lookup);
        assert_eq!(same, base);
    }
}
