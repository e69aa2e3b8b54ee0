use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RequestType {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCategory {
    pub name: String,
    pub request_types: Vec<RequestType>,
}

/// The service catalog drives the classification schemas: which categories
/// exist and which request types belong to each of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCatalog {
    pub categories: Vec<ServiceCategory>,
}

impl ServiceCatalog {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        builder.try_deserialize()
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    pub fn category(&self, name: &str) -> Option<&ServiceCategory> {
        self.categories.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct PromptLimits {
    pub rate_limit: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub model_version: String,
    /// Checkpoint cadence, in completed tickets.
    pub batch_size: u64,
    pub max_retries: u32,
    /// Concurrency ceiling for in-flight classification calls.
    pub parallel_requests: usize,
    /// Wave width: tickets dispatched and awaited together.
    pub parallel_batch_size: usize,
    pub request_timeout_secs: u64,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub log_level: String,
    pub prompt_limits: PromptLimits,
    pub catalog: ServiceCatalog,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn app_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        format!("{}/config", Path::new(&dir).display())
    })
}

lazy_static! {
    pub static ref cfg: AppConfig = {
        let root = app_root();
        let catalog_path = format!("{root}/service_catalog.toml");
        let catalog =
            ServiceCatalog::from_file(&catalog_path).expect("service_catalog.toml is required");

        AppConfig {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model_version: env::var("MODEL_VERSION").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            batch_size: env_or("BATCH_SIZE", 100),
            max_retries: env_or("MAX_RETRIES", 3),
            parallel_requests: env_or("PARALLEL_REQUESTS", 4),
            parallel_batch_size: env_or("PARALLEL_BATCH_SIZE", 8),
            request_timeout_secs: env_or("REQUEST_TIMEOUT", 30),
            input_file: env_or("INPUT_FILE", PathBuf::from("tickets.csv")),
            output_file: env_or("OUTPUT_FILE", PathBuf::from("output_tickets.csv")),
            output_dir: env_or("OUTPUT_DIR", PathBuf::from("data/output")),
            checkpoint_dir: env_or("CHECKPOINT_DIR", PathBuf::from("checkpoints")),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            prompt_limits: PromptLimits {
                rate_limit: env_or("PROMPT_RATE_LIMIT", 10),
                refill_interval_ms: env_or("PROMPT_REFILL_INTERVAL_MS", 200),
                refill_amount: env_or("PROMPT_REFILL_AMOUNT", 2),
            },
            catalog,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> ServiceCatalog {
        ServiceCatalog {
            categories: vec![
                ServiceCategory {
                    name: "Hardware".to_string(),
                    request_types: vec![RequestType {
                        name: "Laptop Request".to_string(),
                        description: "New or replacement laptop".to_string(),
                    }],
                },
                ServiceCategory {
                    name: "Software".to_string(),
                    request_types: vec![RequestType {
                        name: "License Request".to_string(),
                        description: "New software license".to_string(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_category_names() {
        let catalog = test_catalog();
        assert_eq!(catalog.category_names(), vec!["Hardware", "Software"]);
    }

    #[test]
    fn test_category_lookup() {
        let catalog = test_catalog();
        let category = catalog.category("Software").unwrap();
        assert_eq!(category.request_types[0].name, "License Request");
        assert!(catalog.category("Facilities").is_none());
    }

    #[test]
    fn test_env_or_falls_back_on_missing() {
        assert_eq!(env_or("TICKETCLERK_DOES_NOT_EXIST", 42u64), 42);
    }
}
