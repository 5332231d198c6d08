use parley_config::Config;
use parley_core::util::truncate_chars;
use parley_store::SqliteTranscriptStore;
use tracing::info;

/// Strategy for displaying configuration information.
///
/// Outputs the provider settings with the API key masked, the transcript
/// database and whether it opens, and every resolved surface with its
/// compaction settings.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== parley Configuration ===\n");

        println!("Provider:");
        println!("  API Key: {}", mask_api_key(&config.provider.api_key));
        println!("  Base URL: {}", config.provider.base_url);
        println!("  Model: {}", config.provider.model);
        println!("  Summary Model: {}", config.provider.summary_model());
        println!("  Retry Delays (s): {:?}", config.provider.retry_delays_secs);
        println!();

        println!("Database:");
        let db_path = config.database_path()?;
        println!("  Path: {}", db_path.display());

        info!("Testing database connection");
        match SqliteTranscriptStore::new(&db_path).await {
            Ok(_) => println!("  Status: Connected"),
            Err(e) => {
                println!("  Status: Connection failed");
                println!("  Error: {e}");
            }
        }
        println!();

        println!("Surfaces (default: {}):", config.default_surface);
        for name in config.surface_names() {
            let surface = config.surface(&name)?;
            println!("  {name}:");
            println!("    System Prompt: {}", truncate_chars(&surface.system_prompt, 60));
            println!("    Temperature: {}", surface.temperature);
            if let Some(model) = &surface.model {
                println!("    Model: {model}");
            }
            match surface.compaction {
                Some(compaction) => println!(
                    "    Compaction: threshold={}, retain_tail={}",
                    compaction.threshold, compaction.retain_tail
                ),
                None => println!("    Compaction: disabled"),
            }
        }
        println!();

        println!("Logging:");
        println!("  Level: {}", config.logging.level);

        Ok(())
    }
}

fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_keys() {
        assert_eq!(mask_api_key("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask_api_key("short"), "***");
    }
}
