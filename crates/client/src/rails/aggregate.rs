//! Collapse per-rail records into one status per provider.
//!
//! Everything here is pure: the same rails always give the same groups.

use railwatch_shared::{ProviderDisplayStatus, ProviderStatus, RailRecord};

/// Human label for a provider code. Unknown codes are shown as-is.
pub fn provider_label(code: &str) -> &str {
    match code {
        "BRIDGE" => "Bank transfers",
        "MANTECA" => "QR payments",
        other => other,
    }
}

/// `Bank transfers (US, MX)` style name for a provider group.
pub fn display_name(code: &str, rails: &[RailRecord]) -> String {
    let mut countries: Vec<&str> = Vec::new();
    for rail in rails {
        if let Some(country) = rail.method.country.as_deref() {
            if !country.is_empty() && !countries.contains(&country) {
                countries.push(country);
            }
        }
    }

    let label = provider_label(code);
    if countries.is_empty() {
        label.to_string()
    } else {
        format!("{} ({})", label, countries.join(", "))
    }
}

fn precedence(status: ProviderDisplayStatus) -> u8 {
    match status {
        ProviderDisplayStatus::RequiresFollowup => 3,
        ProviderDisplayStatus::Enabled => 2,
        ProviderDisplayStatus::Failed => 1,
        ProviderDisplayStatus::SettingUp => 0,
    }
}

/// Group status: the highest-precedence status among its rails.
pub fn group_status(rails: &[RailRecord]) -> ProviderDisplayStatus {
    rails
        .iter()
        .map(|rail| ProviderDisplayStatus::from(rail.status))
        .max_by_key(|status| precedence(*status))
        .unwrap_or(ProviderDisplayStatus::SettingUp)
}

/// Group rails by provider code, in order of first appearance.
pub fn aggregate(rails: &[RailRecord]) -> Vec<ProviderStatus> {
    let mut groups: Vec<(String, Vec<RailRecord>)> = Vec::new();
    for rail in rails {
        match groups.iter_mut().find(|(code, _)| *code == rail.provider.code) {
            Some((_, members)) => members.push(rail.clone()),
            None => groups.push((rail.provider.code.clone(), vec![rail.clone()])),
        }
    }

    groups
        .into_iter()
        .map(|(provider_code, rails)| ProviderStatus {
            display_name: display_name(&provider_code, &rails),
            status: group_status(&rails),
            provider_code,
            rails,
        })
        .collect()
}

/// True when there is at least one provider and none is still setting up.
pub fn all_settled(providers: &[ProviderStatus]) -> bool {
    !providers.is_empty()
        && providers
            .iter()
            .all(|p| p.status != ProviderDisplayStatus::SettingUp)
}

pub fn needs_followup_action(providers: &[ProviderStatus], provider_code: &str) -> bool {
    providers
        .iter()
        .find(|p| p.provider_code == provider_code)
        .is_some_and(|p| p.status == ProviderDisplayStatus::RequiresFollowup)
}
