//! Thread id generation.

use chrono::Utc;
use uuid::Uuid;

use crate::config::ThreadIdConfig;

/// Generate a thread id such as `billing-20260118-093012-1f3a9c2e`.
///
/// `service_override` replaces the configured service name. If every part is
/// disabled the id falls back to a full UUID v7 so it is never empty.
pub fn generate_thread_id(config: &ThreadIdConfig, service_override: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);

    if config.include_service_name {
        let name = service_override.unwrap_or(&config.service_name);
        if !name.trim().is_empty() {
            parts.push(name.to_string());
        }
    }
    if config.include_timestamp {
        parts.push(Utc::now().format("%Y%m%d-%H%M%S").to_string());
    }
    if config.include_random_suffix {
        parts.push(Uuid::new_v4().simple().to_string()[..8].to_string());
    }

    if parts.is_empty() {
        return Uuid::now_v7().to_string();
    }
    parts.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let id = generate_thread_id(&ThreadIdConfig::default(), None);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4, "service, date, time, suffix: {id}");
        assert_eq!(parts[0], "latchkey");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
    }

    #[test]
    fn test_service_override() {
        let id = generate_thread_id(&ThreadIdConfig::default(), Some("billing"));
        assert!(id.starts_with("billing-"));
    }

    #[test]
    fn test_suffix_only_ids_are_unique() {
        let config = ThreadIdConfig {
            include_service_name: false,
            include_timestamp: false,
            ..ThreadIdConfig::default()
        };
        let a = generate_thread_id(&config, None);
        let b = generate_thread_id(&config, None);
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_all_parts_disabled_falls_back_to_uuid() {
        let config = ThreadIdConfig {
            service_name: String::new(),
            include_service_name: false,
            include_timestamp: false,
            include_random_suffix: false,
        };
        let id = generate_thread_id(&config, None);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
