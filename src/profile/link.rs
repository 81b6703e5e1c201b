//! VLESS + Reality share links.

use crate::profile::server::ServerProfile;
use crate::WardenError;
use uuid::Uuid;

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, WardenError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WardenError::ProfileIO(format!("server profile is missing {}", field)))
}

/// Build the URI a client device imports.
///
/// Format:
/// `vless://<id>@<host>:<port>?encryption=none&flow=<flow>&security=reality&pbk=..&sid=..&type=tcp&headerType=none[&sni=..][&fp=..]#<tag>`
pub fn build_vless_link(
    profile: &ServerProfile,
    identity: &Uuid,
    name: &str,
    flow: &str,
) -> Result<String, WardenError> {
    let host = required(&profile.public_ip, "public_ip")?;
    let port = profile
        .port
        .ok_or_else(|| WardenError::ProfileIO("server profile is missing port".to_string()))?;
    let public_key = required(&profile.public_key, "public_key")?;
    let short_id = required(&profile.short_id, "short_id")?;

    let mut params = format!(
        "encryption=none&flow={}&security=reality&pbk={}&sid={}&type=tcp&headerType=none",
        flow, public_key, short_id
    );
    if !profile.chosen_sni.is_empty() {
        params.push_str(&format!("&sni={}", profile.chosen_sni));
    }
    if !profile.fingerprint.is_empty() {
        params.push_str(&format!("&fp={}", profile.fingerprint));
    }

    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let tag = name.replace(' ', "_");

    Ok(format!("vless://{}@{}:{}?{}#{}", identity, host, port, params, tag))
}
