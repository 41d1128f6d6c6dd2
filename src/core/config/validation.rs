use super::settings::Settings;
use crate::core::errors::ConciergeError;

pub fn validate_settings(settings: &Settings) -> Result<(), ConciergeError> {
    validate_u64_field(
        "retrieval.default_match_count",
        settings.retrieval.default_match_count as u64,
        1,
        20,
    )?;
    validate_u64_field("retrieval.timeout_secs", settings.retrieval.timeout_secs, 1, 600)?;
    validate_u64_field("embedding.timeout_secs", settings.embedding.timeout_secs, 1, 600)?;
    validate_u64_field("chat.connect_timeout_secs", settings.chat.connect_timeout_secs, 1, 600)?;
    validate_u64_field(
        "chat.stream_idle_timeout_secs",
        settings.chat.stream_idle_timeout_secs,
        1,
        3_600,
    )?;
    validate_u64_field("tools.call_timeout_secs", settings.tools.call_timeout_secs, 1, 3_600)?;
    validate_u64_field("workspace.timeout_secs", settings.workspace.timeout_secs, 1, 600)?;

    let temperature = settings.chat.temperature;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConciergeError::Configuration(format!(
            "Invalid config at 'chat.temperature': must be between 0 and 2 (got {})",
            temperature
        )));
    }

    validate_non_empty("embedding.model", &settings.embedding.model)?;
    validate_non_empty("retrieval.match_function", &settings.retrieval.match_function)?;
    validate_non_empty("workspace.time_zone", &settings.workspace.time_zone)?;

    if settings
        .tools
        .server_command
        .iter()
        .any(|part| part.trim().is_empty())
    {
        return Err(ConciergeError::Configuration(
            "Invalid config at 'tools.server_command': entries cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_u64_field(path: &str, value: u64, min: u64, max: u64) -> Result<(), ConciergeError> {
    if value < min || value > max {
        return Err(ConciergeError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_non_empty(path: &str, value: &str) -> Result<(), ConciergeError> {
    if value.trim().is_empty() {
        return Err(ConciergeError::Configuration(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}
