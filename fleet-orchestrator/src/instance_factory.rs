use crate::client_handle::ClientHandle;
use crate::ignition;
use fleet_common::{FleetError, FleetResult, MEMBERSHIP_KEY};
use fleet_providers::ServerSpec;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Process-wide instance index. Starts at 1, never reused within a process.
#[derive(Debug, Default)]
pub struct NameCounter(AtomicU64);

impl NameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Widest zero or space padding accepted in a name placeholder.
pub const MAX_PLACEHOLDER_WIDTH: usize = 20;

struct Rendered {
    name: String,
    placeholders: usize,
    /// Widest padding requested, before clamping.
    widest: usize,
}

// Supports `%d`, `%Nd`, `%0Nd` and `%%`. Anything else after `%` is copied through.
// Padding is clamped to MAX_PLACEHOLDER_WIDTH.
fn render(template: &str, index: u64) -> Rendered {
    let mut out = String::with_capacity(template.len() + 8);
    let mut placeholders = 0;
    let mut widest = 0;
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let spec = &rest[pos + 1..];

        if let Some(after) = spec.strip_prefix('%') {
            out.push('%');
            rest = after;
            continue;
        }

        let digits = spec
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(spec.len());
        match spec[digits..].strip_prefix('d') {
            Some(after) => {
                let requested = match &spec[..digits] {
                    "" => 0,
                    w => w.parse().unwrap_or(usize::MAX),
                };
                widest = widest.max(requested);
                let width = requested.min(MAX_PLACEHOLDER_WIDTH);
                if spec.starts_with('0') {
                    out.push_str(&format!("{:0width$}", index, width = width));
                } else {
                    out.push_str(&format!("{:width$}", index, width = width));
                }
                placeholders += 1;
                rest = after;
            }
            None => {
                out.push('%');
                rest = spec;
            }
        }
    }

    out.push_str(rest);
    Rendered {
        name: out,
        placeholders,
        widest,
    }
}

/// Renders a printf-style name template with the instance index.
pub fn format_name(template: &str, index: u64) -> String {
    render(template, index).name
}

/// Number of integer placeholders in a name template.
pub fn placeholder_count(template: &str) -> usize {
    render(template, 0).placeholders
}

/// Widest padding any placeholder in the template asks for.
pub fn placeholder_width(template: &str) -> usize {
    render(template, 0).widest
}

struct IgnitionKey {
    username: String,
    public_key: String,
}

/// Builds and submits create requests for the fleet.
pub struct InstanceFactory {
    fleet: String,
    template: ServerSpec,
    ignition: Option<IgnitionKey>,
    counter: NameCounter,
    client: ClientHandle,
}

impl InstanceFactory {
    pub fn new(fleet: impl Into<String>, template: ServerSpec, client: ClientHandle) -> Self {
        Self {
            fleet: fleet.into(),
            template,
            ignition: None,
            counter: NameCounter::new(),
            client,
        }
    }

    /// Injects `public_key` for `username` into the Ignition user data of every request.
    pub fn with_ignition_key(
        mut self,
        username: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        self.ignition = Some(IgnitionKey {
            username: username.into(),
            public_key: public_key.into(),
        });
        self
    }

    /// Next create request: unique name, membership tag, merged user data.
    pub fn next_spec(&self) -> FleetResult<ServerSpec> {
        let index = self.counter.next();
        let mut spec = self.template.clone();
        spec.name = format_name(&self.template.name, index);
        spec.metadata
            .insert(MEMBERSHIP_KEY.to_string(), self.fleet.clone());

        if let Some(key) = &self.ignition {
            let merged = ignition::merge(
                spec.user_data.as_deref().unwrap_or_default(),
                &key.username,
                &key.public_key,
            )
            .map_err(|e| FleetError::Config(format!("user_data: {}", e)))?;
            spec.user_data = Some(merged);
        }

        Ok(spec)
    }

    /// Submits one create request and returns the remote server id.
    pub async fn create(&self) -> FleetResult<String> {
        let cloud = self.client.snapshot();
        let spec = self.next_spec()?;
        debug!(name = %spec.name, fleet = %self.fleet, "submitting create request");

        let created = cloud
            .create_instance(&spec)
            .await
            .map_err(FleetError::Create)?;
        info!(server_id = %created.id, name = %spec.name, "instance creation request successful");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_printf_templates() {
        assert_eq!(format_name("gitlab-runner-%d", 7), "gitlab-runner-7");
        assert_eq!(format_name("runner-%04d", 7), "runner-0007");
        assert_eq!(format_name("runner-%3d", 7), "runner-  7");
        assert_eq!(format_name("100%%-runner-%d", 2), "100%-runner-2");
        assert_eq!(format_name("odd-%s-%d", 3), "odd-%s-3");
        assert_eq!(format_name("trailing-%", 3), "trailing-%");
    }

    #[test]
    fn counts_placeholders() {
        assert_eq!(placeholder_count("runner-%d"), 1);
        assert_eq!(placeholder_count("runner-%05d"), 1);
        assert_eq!(placeholder_count("runner"), 0);
        assert_eq!(placeholder_count("runner-%%d"), 0);
        assert_eq!(placeholder_count("%d-%d"), 2);
    }

    #[test]
    fn padding_is_bounded() {
        assert_eq!(placeholder_width("runner-%d"), 0);
        assert_eq!(placeholder_width("runner-%05d"), 5);
        assert_eq!(placeholder_width("r-%100000000d"), 100_000_000);
        assert_eq!(placeholder_width("r-%99999999999999999999999d"), usize::MAX);

        let name = format_name("r-%100000000d", 7);
        assert_eq!(name.len(), 2 + MAX_PLACEHOLDER_WIDTH);
        assert!(name.ends_with(" 7"));
        assert_eq!(format_name("r-%099999999999999999999999d", 7), format!("r-{:020}", 7));
    }

    #[test]
    fn counter_is_monotonic_from_one() {
        let counter = NameCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }
}
