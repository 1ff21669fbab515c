use super::models::Config;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    MustBePositive { field: &'static str },

    #[error("crawler.base_url '{url}' is not a valid http(s) URL")]
    InvalidBaseUrl { url: String },

    #[error("{field} must list at least one extension")]
    EmptyExtensions { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_queue(config)?;
    validate_crawler(config)?;
    validate_output(config)?;
    Ok(())
}

fn positive(value: usize, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::MustBePositive { field });
    }
    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    positive(config.queue.workers, "queue.workers")?;
    positive(config.queue.capacity, "queue.capacity")?;
    positive(config.server.event_buffer, "server.event_buffer")
}

fn validate_crawler(config: &Config) -> Result<(), ValidationError> {
    let crawler = &config.crawler;
    positive(crawler.download_concurrency, "crawler.download_concurrency")?;
    positive(crawler.max_pages as usize, "crawler.max_pages")?;
    if crawler.request_timeout.is_zero() {
        return Err(ValidationError::MustBePositive {
            field: "crawler.request_timeout",
        });
    }

    let is_http = Url::parse(&crawler.base_url)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false);
    if !is_http {
        return Err(ValidationError::InvalidBaseUrl {
            url: crawler.base_url.clone(),
        });
    }
    Ok(())
}

fn validate_output(config: &Config) -> Result<(), ValidationError> {
    if config.output.image_extensions.is_empty() {
        return Err(ValidationError::EmptyExtensions {
            field: "output.image_extensions",
        });
    }
    if config.output.video_extensions.is_empty() {
        return Err(ValidationError::EmptyExtensions {
            field: "output.video_extensions",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;

    #[test]
    fn test_valid_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = Config::default();
        config.queue.workers = 0;

        assert_eq!(
            validate(&config),
            Err(ValidationError::MustBePositive {
                field: "queue.workers"
            })
        );
    }

    #[test]
    fn test_zero_capacity() {
        let mut config = Config::default();
        config.queue.capacity = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MustBePositive { field: "queue.capacity" })
        ));
    }

    #[test]
    fn test_zero_request_timeout() {
        let mut config = Config::default();
        config.crawler.request_timeout = HumanDuration::from_millis(0);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        for url in ["not a url", "ftp://files.example.com", "file:///tmp"] {
            let mut config = Config::default();
            config.crawler.base_url = url.to_string();

            assert!(matches!(
                validate(&config),
                Err(ValidationError::InvalidBaseUrl { .. })
            ));
        }
    }

    #[test]
    fn test_empty_extensions() {
        let mut config = Config::default();
        config.output.video_extensions.clear();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyExtensions { .. })
        ));
    }
}
