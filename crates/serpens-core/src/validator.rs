//! Config validation.
//!
//! [`Validator::validate`] is a pure, total function over an untyped YAML
//! document: it never fails, and every rule runs regardless of earlier
//! failures so the operator sees all violations at once. Each violation is
//! prefixed with the offending field path. The order is fixed by the order
//! of the checks below.

use std::collections::HashSet;

use regex::Regex;
use serde_yaml::Value;

use crate::config::{ConfigError, ServiceConfig, parse_document};
use crate::policy::{
    OWNER_PLACEHOLDER, PORT_RANGE_END, PORT_RANGE_START, PlatformPolicy, SCHEMA_VERSION,
    TAG_PLACEHOLDER,
};

/// Top-level keys every config must carry.
const REQUIRED_FIELDS: [&str; 5] = ["version", "service", "routing", "resources", "healthcheck"];

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    violations: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<String> {
        self.violations
    }
}

/// Checks configs against a [`PlatformPolicy`].
#[derive(Debug, Clone)]
pub struct Validator {
    policy: PlatformPolicy,
    name_re: Regex,
    memory_re: Regex,
    volume_size_re: Regex,
    forbidden_env_re: Regex,
}

impl Validator {
    pub fn new(policy: PlatformPolicy) -> Result<Self, ConfigError> {
        Ok(Self {
            policy,
            name_re: Regex::new(r"^[A-Za-z0-9-]+$")?,
            memory_re: Regex::new(r"^(\d+)([mMgG])$")?,
            volume_size_re: Regex::new(r"^\d+(Mi|Gi)$")?,
            forbidden_env_re: Regex::new(r"(DOCKER_HOST|docker\.sock|LD_PRELOAD|LD_LIBRARY_PATH)")?,
        })
    }

    pub fn policy(&self) -> &PlatformPolicy {
        &self.policy
    }

    /// Validate a raw config document.
    pub fn validate(&self, doc: &Value) -> Validation {
        let mut v = Vec::new();

        if !doc.is_mapping() {
            v.push("document: must be a mapping of top-level keys".to_string());
        }
        for field in REQUIRED_FIELDS {
            if doc.get(field).is_none() {
                v.push(format!("{field}: missing required field"));
            }
        }

        self.check_version(doc, &mut v);
        self.check_service(doc.get("service"), &mut v);
        self.check_routing(doc.get("routing"), &mut v);
        self.check_resources(doc.get("resources"), &mut v);
        self.check_deployment(doc.get("deployment"), &mut v);
        self.check_volumes(doc.get("volumes"), &mut v);
        self.check_environment(doc.get("environment"), &mut v);
        self.check_healthcheck(doc.get("healthcheck"), &mut v);

        Validation { violations: v }
    }

    /// Parse, validate and convert config text in one go.
    ///
    /// Unparseable YAML and a document that passes every rule but still
    /// fails typed conversion are both reported as violations.
    pub fn check(&self, content: &str) -> Result<ServiceConfig, Vec<String>> {
        let doc = parse_document(content).map_err(|e| vec![format!("document: {e}")])?;
        let validation = self.validate(&doc);
        if !validation.is_valid() {
            return Err(validation.into_violations());
        }
        ServiceConfig::from_document(doc).map_err(|e| vec![format!("document: {e}")])
    }

    fn check_version(&self, doc: &Value, v: &mut Vec<String>) {
        let ok = match doc.get("version") {
            Some(Value::String(s)) => s == SCHEMA_VERSION,
            // `version: 1.0` is a YAML float; an integer `1` is not the schema.
            Some(Value::Number(n)) => n.is_f64() && n.as_f64() == Some(1.0),
            _ => false,
        };
        if !ok {
            v.push(format!("version: must be '{SCHEMA_VERSION}'"));
        }
    }

    fn check_service(&self, service: Option<&Value>, v: &mut Vec<String>) {
        let Some(service) = service else { return };

        match service.get("name").map(Value::as_str) {
            None => v.push("service.name: missing".to_string()),
            Some(None) => v.push("service.name: must be a string".to_string()),
            Some(Some(name)) => {
                if name.is_empty() {
                    v.push("service.name: must not be empty".to_string());
                } else if !self.name_re.is_match(name) {
                    v.push("service.name: must be alphanumeric with hyphens only".to_string());
                }
                if self.policy.reserved_names.iter().any(|r| r == name) {
                    v.push(format!("service.name: '{name}' is reserved"));
                }
            }
        }

        match service.get("image").map(Value::as_str) {
            None => v.push("service.image: missing".to_string()),
            Some(None) => v.push("service.image: must be a string".to_string()),
            Some(Some(image)) => {
                if !image.contains(OWNER_PLACEHOLDER) {
                    v.push(format!("service.image: must use {OWNER_PLACEHOLDER}"));
                }
                if !image.contains(TAG_PLACEHOLDER) {
                    v.push(format!("service.image: must use {TAG_PLACEHOLDER}"));
                }
            }
        }
    }

    fn check_routing(&self, routing: Option<&Value>, v: &mut Vec<String>) {
        let Some(routing) = routing else { return };

        match routing.get("domain").map(Value::as_str) {
            None => v.push("routing.domain: missing".to_string()),
            Some(Some(domain)) if self.policy.owns_domain(domain) => {}
            Some(_) => v.push(format!(
                "routing.domain: must end with .{}",
                self.policy.domain_suffix
            )),
        }

        match routing.get("port") {
            None => v.push("routing.port: missing".to_string()),
            Some(port) => {
                let in_range = port
                    .as_i64()
                    .is_some_and(|p| (PORT_RANGE_START as i64..=PORT_RANGE_END as i64).contains(&p));
                if !in_range {
                    v.push(format!(
                        "routing.port: must be an integer between {PORT_RANGE_START} and {PORT_RANGE_END}"
                    ));
                }
            }
        }

        match routing.get("paths") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(paths)) => {
                let mut seen = HashSet::new();
                for entry in paths {
                    match entry.get("path").and_then(Value::as_str) {
                        Some(path) => {
                            if !path.starts_with('/') {
                                v.push(format!("routing.paths: '{path}' must start with '/'"));
                            }
                            if !seen.insert(path) {
                                v.push(format!("routing.paths: duplicate path {path}"));
                            }
                        }
                        None => v.push("routing.paths: every entry needs a path".to_string()),
                    }
                    if let Some(port) = entry.get("port") {
                        let ok = port.as_i64().is_some_and(|p| (1..=65535).contains(&p));
                        if !ok {
                            v.push("routing.paths: port must be a valid TCP port".to_string());
                        }
                    }
                }
            }
            Some(_) => v.push("routing.paths: must be a list".to_string()),
        }
    }

    fn check_resources(&self, resources: Option<&Value>, v: &mut Vec<String>) {
        let Some(resources) = resources else { return };

        match resources.get("memory").map(Value::as_str) {
            None => v.push("resources.memory: missing".to_string()),
            Some(None) => v.push("resources.memory: must be a string like 128m".to_string()),
            Some(Some(mem)) => self.check_memory(mem, v),
        }

        if let Some(cpu) = resources.get("cpu") {
            let parsed = match cpu {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed {
                Some(c) if c > 0.0 && c <= self.policy.max_cpu => {}
                Some(c) if c > self.policy.max_cpu => v.push(format!(
                    "resources.cpu: limit too high (max {} cores)",
                    self.policy.max_cpu
                )),
                _ => v.push("resources.cpu: must be a positive number of cores".to_string()),
            }
        }
    }

    fn check_memory(&self, mem: &str, v: &mut Vec<String>) {
        let Some(caps) = self.memory_re.captures(mem) else {
            v.push(format!("resources.memory: invalid format '{mem}', expected <int><m|M|g|G>"));
            return;
        };
        let Ok(value) = caps[1].parse::<u64>() else {
            v.push(format!("resources.memory: value out of range '{mem}'"));
            return;
        };
        let megabytes = match caps[2].to_ascii_lowercase().as_str() {
            "g" => value.saturating_mul(1024),
            _ => value,
        };
        if megabytes < self.policy.min_memory_mb {
            v.push(format!(
                "resources.memory: must be at least {}m",
                self.policy.min_memory_mb
            ));
        } else if megabytes > self.policy.max_memory_mb {
            v.push(format!(
                "resources.memory: limit exceeds {}g",
                self.policy.max_memory_mb / 1024
            ));
        }
    }

    fn check_deployment(&self, deployment: Option<&Value>, v: &mut Vec<String>) {
        let Some(deploy) = deployment else { return };
        if deploy.is_null() {
            return;
        }
        if !deploy.is_mapping() {
            v.push("deployment: must be a mapping".to_string());
            return;
        }

        if let Some(replicas) = deploy.get("replicas") {
            let max = self.policy.max_replicas as i64;
            if !replicas.as_i64().is_some_and(|r| (1..=max).contains(&r)) {
                v.push(format!("deployment.replicas: must be between 1 and {max}"));
            }
        }

        match deploy.get("privileged") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => {}
            Some(_) => v.push("deployment.privileged: privileged mode is not allowed".to_string()),
        }

        match deploy.get("cap_add") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(caps)) if caps.is_empty() => {}
            Some(_) => v.push("deployment.cap_add: adding capabilities is not allowed".to_string()),
        }

        if let Some(mode) = deploy.get("network_mode") {
            let allowed = mode
                .as_str()
                .is_some_and(|m| self.policy.allowed_network_modes.iter().any(|a| a == m));
            if !allowed {
                v.push(format!(
                    "deployment.network_mode: must be one of {}",
                    self.policy.allowed_network_modes.join(", ")
                ));
            }
        }
    }

    fn check_volumes(&self, volumes: Option<&Value>, v: &mut Vec<String>) {
        let volumes = match volumes {
            None | Some(Value::Null) => return,
            Some(Value::Sequence(vols)) => vols,
            Some(_) => {
                v.push("volumes: must be a list".to_string());
                return;
            }
        };

        for (i, vol) in volumes.iter().enumerate() {
            if vol.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
                v.push(format!("volumes[{i}].name: missing"));
            }

            match vol.get("path").and_then(Value::as_str) {
                None => v.push(format!("volumes[{i}].path: missing")),
                Some(path) => {
                    if !path.starts_with(&self.policy.sandbox_root) {
                        v.push(format!(
                            "volumes[{i}].path: must start with {}: {path}",
                            self.policy.sandbox_root
                        ));
                    }
                    if path.split('/').any(|segment| segment == "..") {
                        v.push(format!("volumes[{i}].path: path traversal not allowed: {path}"));
                    }
                }
            }

            if let Some(size) = vol.get("size") {
                if !size.as_str().is_some_and(|s| self.volume_size_re.is_match(s)) {
                    v.push(format!("volumes[{i}].size: must look like 100Mi or 1Gi"));
                }
            }

            if let Some(readonly) = vol.get("readonly") {
                if !readonly.is_bool() {
                    v.push(format!("volumes[{i}].readonly: must be a boolean"));
                }
            }
        }
    }

    fn check_environment(&self, environment: Option<&Value>, v: &mut Vec<String>) {
        let entries = match environment {
            None | Some(Value::Null) => return,
            Some(Value::Sequence(entries)) => entries,
            Some(_) => {
                v.push("environment: must be a list of KEY=VALUE strings".to_string());
                return;
            }
        };

        for (i, entry) in entries.iter().enumerate() {
            match entry.as_str() {
                Some(env) => {
                    if let Some(m) = self.forbidden_env_re.find(env) {
                        v.push(format!(
                            "environment[{i}]: references forbidden variable {}",
                            m.as_str()
                        ));
                    }
                }
                None => v.push(format!("environment[{i}]: must be a KEY=VALUE string")),
            }
        }
    }

    fn check_healthcheck(&self, healthcheck: Option<&Value>, v: &mut Vec<String>) {
        let Some(hc) = healthcheck else { return };
        if hc.is_null() {
            return;
        }
        if !hc.is_mapping() {
            v.push("healthcheck: must be a mapping".to_string());
            return;
        }
        if let Some(endpoint) = hc.get("endpoint") {
            if !endpoint.as_str().is_some_and(|e| e.starts_with('/')) {
                v.push("healthcheck.endpoint: must be a path starting with '/'".to_string());
            }
        }
        if let Some(retries) = hc.get("retries") {
            if !retries.as_u64().is_some_and(|r| r > 0) {
                v.push("healthcheck.retries: must be a positive integer".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;

    fn validator() -> Validator {
        Validator::new(PlatformPolicy::default()).unwrap()
    }

    fn base_doc() -> Value {
        parse_document(
            r#"
version: "1.0"
service:
  name: light
  image: ghcr.io/${GITHUB_REPOSITORY_OWNER}/light:${TAG}
routing:
  domain: light.serpens.local
  port: 5000
resources:
  memory: 128m
  cpu: 0.5
healthcheck:
  endpoint: /health
"#,
        )
        .unwrap()
    }

    fn with(path: &[&str], value: Value) -> Value {
        let mut doc = base_doc();
        let mut cursor = &mut doc;
        for key in &path[..path.len() - 1] {
            let map = cursor.as_mapping_mut().unwrap();
            if !map.contains_key(*key) {
                map.insert(Value::from(*key), Value::Mapping(Default::default()));
            }
            cursor = map.get_mut(*key).unwrap();
        }
        cursor
            .as_mapping_mut()
            .unwrap()
            .insert(Value::from(path[path.len() - 1]), value);
        doc
    }

    fn violations(doc: &Value) -> Vec<String> {
        validator().validate(doc).into_violations()
    }

    #[test]
    fn valid_config_passes() {
        let result = validator().validate(&base_doc());
        assert!(result.is_valid(), "{:?}", result.violations());
    }

    #[test]
    fn validation_is_deterministic() {
        let doc = parse_document("service: 3\nrouting: [1]\nresources: {memory: 9z}").unwrap();
        let first = violations(&doc);
        let second = violations(&doc);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn non_mapping_document_is_a_violation_not_a_panic() {
        for text in ["42", "- a\n- b", "~", "'just a string'"] {
            let doc = parse_document(text).unwrap();
            let v = violations(&doc);
            assert!(v.iter().any(|m| m.starts_with("document:")), "{text}: {v:?}");
            assert!(v.iter().any(|m| m == "routing: missing required field"));
        }
    }

    #[test]
    fn reports_every_missing_required_field() {
        let doc = parse_document("{}").unwrap();
        let v = violations(&doc);
        for field in REQUIRED_FIELDS {
            assert!(v.contains(&format!("{field}: missing required field")), "{v:?}");
        }
    }

    #[test]
    fn wrong_version_rejected() {
        let v = violations(&with(&["version"], Value::from("2.0")));
        assert_eq!(v, vec!["version: must be '1.0'"]);
        assert!(violations(&with(&["version"], Value::from(1.0))).is_empty());
        assert_eq!(
            violations(&with(&["version"], Value::from(1))),
            vec!["version: must be '1.0'"]
        );
        let parsed_int = parse_document("1").unwrap();
        assert_eq!(
            violations(&with(&["version"], parsed_int)),
            vec!["version: must be '1.0'"]
        );
    }

    #[test]
    fn service_name_rules() {
        let v = violations(&with(&["service", "name"], Value::from("bad_name!")));
        assert_eq!(v, vec!["service.name: must be alphanumeric with hyphens only"]);

        let v = violations(&with(&["service", "name"], Value::from("admin")));
        assert_eq!(v, vec!["service.name: 'admin' is reserved"]);

        let v = violations(&with(&["service", "name"], Value::from("")));
        assert_eq!(v, vec!["service.name: must not be empty"]);
    }

    #[test]
    fn image_needs_both_placeholders() {
        let v = violations(&with(&["service", "image"], Value::from("ghcr.io/me/light:latest")));
        assert_eq!(v.len(), 2);
        assert!(v[0].contains("${GITHUB_REPOSITORY_OWNER}"));
        assert!(v[1].contains("${TAG}"));
    }

    #[test]
    fn domain_must_be_under_platform() {
        let v = violations(&with(&["routing", "domain"], Value::from("light.example.com")));
        assert_eq!(v, vec!["routing.domain: must end with .serpens.local"]);
    }

    #[test]
    fn port_out_of_range_cites_range() {
        let v = violations(&with(&["routing", "port"], Value::from(70000)));
        assert_eq!(v.len(), 1);
        assert!(v[0].starts_with("routing.port:"));
        assert!(v[0].contains("3000") && v[0].contains("9999"));

        assert!(violations(&with(&["routing", "port"], Value::from(3000))).is_empty());
        assert!(violations(&with(&["routing", "port"], Value::from(9999))).is_empty());
        assert_eq!(violations(&with(&["routing", "port"], Value::from(2999))).len(), 1);
        assert_eq!(violations(&with(&["routing", "port"], Value::from("5000"))).len(), 1);
    }

    #[test]
    fn duplicate_paths_rejected() {
        let paths = parse_document("- path: /api\n- path: /ws\n- path: /api").unwrap();
        let v = violations(&with(&["routing", "paths"], paths));
        assert_eq!(v, vec!["routing.paths: duplicate path /api"]);
    }

    #[test]
    fn memory_bounds_are_exact() {
        let check = |mem: &str| violations(&with(&["resources", "memory"], Value::from(mem)));
        assert!(check("64m").is_empty());
        assert!(check("64M").is_empty());
        assert_eq!(check("63m"), vec!["resources.memory: must be at least 64m"]);
        assert!(check("1g").is_empty());
        assert!(check("1G").is_empty());
        assert_eq!(check("2g"), vec!["resources.memory: limit exceeds 1g"]);
        assert!(check("1024m").is_empty());
        assert_eq!(check("1025m").len(), 1);
        assert_eq!(check("0g"), vec!["resources.memory: must be at least 64m"]);
        assert!(check("128k")[0].contains("invalid format"));
        assert!(check("m")[0].contains("invalid format"));
    }

    #[test]
    fn cpu_ceiling() {
        assert!(violations(&with(&["resources", "cpu"], Value::from(2.0))).is_empty());
        assert!(violations(&with(&["resources", "cpu"], Value::from("1.5"))).is_empty());
        let v = violations(&with(&["resources", "cpu"], Value::from(2.5)));
        assert_eq!(v, vec!["resources.cpu: limit too high (max 2 cores)"]);
        assert_eq!(violations(&with(&["resources", "cpu"], Value::from(0))).len(), 1);
    }

    #[test]
    fn privileged_always_fails() {
        let mut doc = with(&["deployment", "privileged"], Value::from(true));
        assert!(violations(&doc).contains(&"deployment.privileged: privileged mode is not allowed".to_string()));

        // Still reported alongside unrelated failures.
        doc.as_mapping_mut().unwrap().remove("version");
        let v = violations(&doc);
        assert!(v.iter().any(|m| m.starts_with("deployment.privileged")));
        assert!(v.iter().any(|m| m.starts_with("version")));

        assert!(violations(&with(&["deployment", "privileged"], Value::from(false))).is_empty());
    }

    #[test]
    fn capabilities_and_network_mode() {
        let caps = parse_document("[NET_ADMIN]").unwrap();
        let v = violations(&with(&["deployment", "cap_add"], caps));
        assert_eq!(v, vec!["deployment.cap_add: adding capabilities is not allowed"]);

        let empty = parse_document("[]").unwrap();
        assert!(violations(&with(&["deployment", "cap_add"], empty)).is_empty());

        for mode in ["host", "none"] {
            let v = violations(&with(&["deployment", "network_mode"], Value::from(mode)));
            assert_eq!(v.len(), 1, "{mode}");
        }
        for mode in ["bridge", "overlay"] {
            assert!(violations(&with(&["deployment", "network_mode"], Value::from(mode))).is_empty());
        }
    }

    #[test]
    fn replica_cap() {
        assert!(violations(&with(&["deployment", "replicas"], Value::from(3))).is_empty());
        assert_eq!(violations(&with(&["deployment", "replicas"], Value::from(4))).len(), 1);
        assert_eq!(violations(&with(&["deployment", "replicas"], Value::from(0))).len(), 1);
    }

    #[test]
    fn volume_paths_are_sandboxed() {
        let vols = parse_document(
            r#"
- name: data
  path: /app/data
  size: 1Gi
  readonly: true
- name: escape
  path: /app/../etc
- name: socket
  path: /var/run/docker.sock
- path: /app/ok
  size: 10GB
"#,
        )
        .unwrap();
        let v = violations(&with(&["volumes"], vols));
        assert_eq!(
            v,
            vec![
                "volumes[1].path: path traversal not allowed: /app/../etc",
                "volumes[2].path: must start with /app/: /var/run/docker.sock",
                "volumes[3].name: missing",
                "volumes[3].size: must look like 100Mi or 1Gi",
            ]
        );
    }

    #[test]
    fn forbidden_environment() {
        let env = parse_document(
            "- MODE=prod\n- DOCKER_HOST=tcp://x\n- SOCK=/var/run/docker.sock\n- LD_PRELOAD=/x.so",
        )
        .unwrap();
        let v = violations(&with(&["environment"], env));
        assert_eq!(v.len(), 3);
        assert!(v[0].contains("DOCKER_HOST"));
        assert!(v[1].contains("docker.sock"));
        assert!(v[2].contains("LD_PRELOAD"));
    }

    #[test]
    fn wrong_shapes_become_violations() {
        let doc = parse_document(
            r#"
version: "1.0"
service: [1, 2]
routing: { domain: 7, port: x, paths: oops }
resources: { memory: 128 }
healthcheck: nope
volumes: {}
environment: 5
deployment: true
"#,
        )
        .unwrap();
        let v = violations(&doc);
        assert!(v.contains(&"service.name: missing".to_string()));
        assert!(v.contains(&"routing.paths: must be a list".to_string()));
        assert!(v.contains(&"resources.memory: must be a string like 128m".to_string()));
        assert!(v.contains(&"healthcheck: must be a mapping".to_string()));
        assert!(v.contains(&"volumes: must be a list".to_string()));
        assert!(v.contains(&"deployment: must be a mapping".to_string()));
    }

    #[test]
    fn check_converts_valid_text() {
        let text = serde_yaml::to_string(&base_doc()).unwrap();
        let config = validator().check(&text).unwrap();
        assert_eq!(config.name(), "light");
        assert_eq!(config.routing.port, 5000);
    }

    #[test]
    fn check_reports_unparseable_text() {
        let violations = validator().check("service: [").unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("document:"));
    }

    #[test]
    fn check_returns_all_violations() {
        let doc = with(&["routing", "port"], Value::from(70000));
        let text = serde_yaml::to_string(&doc).unwrap();
        let violations = validator().check(&text).unwrap_err();
        assert!(violations.iter().any(|v| v.starts_with("routing.port:")));
    }
}
