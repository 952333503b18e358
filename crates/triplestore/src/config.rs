use std::{collections::BTreeMap, fmt, time::Duration};

use serde_json::Value;

use crate::error::{Result, TriplestoreError};

/// Flat option map supplied by callers, keyed by option name.
pub type ConfigMap = BTreeMap<String, Value>;

/// Default used to fill an optional key that the caller left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Null,
    Str(&'static str),
    Bool(bool),
    UInt(u64),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Str(value) => Value::String(value.to_string()),
            Self::Bool(value) => Value::Bool(value),
            Self::UInt(value) => Value::from(value),
        }
    }
}

/// Declared configuration shape of one backend type.
#[derive(Debug)]
pub struct ConfigSchema {
    pub required: &'static [&'static str],
    pub optional: &'static [(&'static str, DefaultValue)],
    /// alias -> canonical key
    pub aliases: &'static [(&'static str, &'static str)],
}

impl ConfigSchema {
    fn is_declared(&self, key: &str) -> bool {
        self.required.iter().any(|name| *name == key) || self.optional.iter().any(|(name, _)| *name == key)
    }

    fn canonical<'a>(&self, key: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == key)
            .map_or(key, |(_, canonical)| *canonical)
    }

    /// Keys of `user_config` that are neither declared nor aliases, sorted.
    pub fn unknown_keys(&self, user_config: &ConfigMap) -> Vec<String> {
        user_config
            .keys()
            .filter(|key| {
                !self.is_declared(key)
                    && !self.aliases.iter().any(|(alias, _)| *alias == key.as_str())
            })
            .cloned()
            .collect()
    }
}

/// Validate a user configuration against `schema` and fill in defaults.
///
/// Aliases are renamed to their canonical key first (when both spellings are
/// present, whichever is visited last wins). Every missing required key is
/// reported at once. Unknown keys are kept and reported with a warning.
pub fn normalize(
    user_config: &ConfigMap,
    schema: &ConfigSchema,
    backend_name: &str,
) -> Result<BackendConfig> {
    if let Some((alias, target)) = schema
        .aliases
        .iter()
        .find(|(_, target)| !schema.is_declared(target))
    {
        return Err(TriplestoreError::InvalidConfig {
            backend: backend_name.to_string(),
            key: (*alias).to_string(),
            reason: format!("alias target '{target}' is not a declared config key"),
        });
    }

    let mut values = ConfigMap::new();
    for (key, value) in user_config {
        values.insert(schema.canonical(key).to_string(), value.clone());
    }

    let missing: Vec<String> = schema
        .required
        .iter()
        .filter(|key| !values.contains_key(**key))
        .map(|key| (*key).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TriplestoreError::MissingConfig {
            backend: backend_name.to_string(),
            keys: missing,
        });
    }

    for (key, default) in schema.optional {
        values
            .entry((*key).to_string())
            .or_insert_with(|| default.to_value());
    }

    let unknown = schema.unknown_keys(user_config);
    if !unknown.is_empty() {
        tracing::warn!(
            backend = %backend_name,
            keys = %unknown.join(", "),
            "Ignoring unrecognized config keys"
        );
    }

    Ok(BackendConfig {
        backend: backend_name.to_string(),
        values,
    })
}

/// HTTP basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Normalized, immutable configuration owned by one backend instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    backend: String,
    values: ConfigMap,
}

impl BackendConfig {
    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn into_map(self) -> ConfigMap {
        self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> TriplestoreError {
        TriplestoreError::InvalidConfig {
            backend: self.backend.clone(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// String value; `null`, absent and empty strings read as `None`.
    pub fn str(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) if value.is_empty() => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(other) => Err(self.invalid(key, format!("expected a string, got {other}"))),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&str> {
        self.str(key)?
            .ok_or_else(|| self.invalid(key, "expected a non-empty string"))
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(value)) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(self.invalid(key, format!("expected a boolean, got '{value}'"))),
            },
            Some(other) => Err(self.invalid(key, format!("expected a boolean, got {other}"))),
        }
    }

    pub fn u64(&self, key: &str) -> Result<Option<u64>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(number)) => number.as_u64().map(Some).ok_or_else(|| {
                self.invalid(key, format!("expected an unsigned integer, got {number}"))
            }),
            Some(Value::String(value)) => value.parse().map(Some).map_err(|_| {
                self.invalid(key, format!("expected an unsigned integer, got '{value}'"))
            }),
            Some(other) => {
                Err(self.invalid(key, format!("expected an unsigned integer, got {other}")))
            }
        }
    }

    /// Millisecond option as a `Duration`, falling back to `default`.
    pub fn duration_ms(&self, key: &str, default: Duration) -> Result<Duration> {
        Ok(self.u64(key)?.map_or(default, Duration::from_millis))
    }

    /// Named graph used for scoping, if any.
    pub fn graph(&self) -> Result<Option<String>> {
        Ok(self.str("graph")?.map(str::to_string))
    }

    /// `auth` as `[user, password]`, `{username, password}` or `null`.
    pub fn auth(&self) -> Result<Option<Credentials>> {
        let credentials = match self.values.get("auth") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(pair)) => match pair.as_slice() {
                [Value::String(username), Value::String(password)] => Credentials {
                    username: username.clone(),
                    password: password.clone(),
                },
                _ => return Err(self.invalid("auth", "expected [username, password]")),
            },
            Some(Value::Object(map)) => {
                match (
                    map.get("username").and_then(Value::as_str),
                    map.get("password").and_then(Value::as_str),
                ) {
                    (Some(username), Some(password)) => Credentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    },
                    _ => {
                        return Err(
                            self.invalid("auth", "expected an object with username and password")
                        );
                    }
                }
            }
            Some(_) => return Err(self.invalid("auth", "expected a credential pair or null")),
        };
        Ok(Some(credentials))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;

    const SCHEMA: ConfigSchema = ConfigSchema {
        required: &["name", "base_url"],
        optional: &[
            ("graph", DefaultValue::Null),
            ("timeout_ms", DefaultValue::UInt(60_000)),
            ("launch", DefaultValue::Bool(true)),
        ],
        aliases: &[("namespace", "name"), ("graph_uri", "graph")],
    };

    fn map(value: Value) -> ConfigMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn aliases_are_renamed_and_defaults_filled() {
        let config = normalize(
            &map(json!({ "namespace": "kb", "base_url": "http://h:1", "graph_uri": "http://g" })),
            &SCHEMA,
            "test",
        )
        .unwrap();

        assert_eq!(config.required_str("name").unwrap(), "kb");
        assert_eq!(config.graph().unwrap().as_deref(), Some("http://g"));
        assert_eq!(config.u64("timeout_ms").unwrap(), Some(60_000));
        assert!(config.bool("launch").unwrap());
        assert!(config.get("namespace").is_none());
        assert!(config.get("graph_uri").is_none());
    }

    #[test]
    fn null_defaults_are_present_in_output() {
        let config = normalize(
            &map(json!({ "name": "kb", "base_url": "http://h:1" })),
            &SCHEMA,
            "test",
        )
        .unwrap();

        assert_eq!(config.get("graph"), Some(&Value::Null));
        assert_eq!(config.graph().unwrap(), None);
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let inputs = [
            json!({ "namespace": "kb", "base_url": "http://h:1" }),
            json!({ "name": "kb", "base_url": "http://h:1", "graph": "http://g", "extra": 3 }),
            json!({ "name": "kb", "base_url": "http://h:1", "launch": false, "timeout_ms": 5 }),
        ];
        for input in inputs {
            let once = normalize(&map(input), &SCHEMA, "test").unwrap();
            let twice = normalize(once.values(), &SCHEMA, "test").unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn missing_keys_lists_exactly_the_omitted_subset() {
        let cases: [(Value, &[&str]); 4] = [
            (json!({}), &["name", "base_url"]),
            (json!({ "name": "kb" }), &["base_url"]),
            (json!({ "namespace": "kb" }), &["base_url"]),
            (json!({ "base_url": "http://h:1" }), &["name"]),
        ];
        for (input, expected) in cases {
            match normalize(&map(input), &SCHEMA, "test") {
                Err(TriplestoreError::MissingConfig { backend, keys }) => {
                    assert_eq!(backend, "test");
                    assert_eq!(keys, expected);
                }
                other => panic!("expected MissingConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_config_message_names_every_key() {
        let error = normalize(&map(json!({})), &SCHEMA, "Blazegraph").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("[Blazegraph]"));
        assert!(message.contains("name, base_url"));
    }

    #[test]
    fn unknown_keys_survive_normalization() {
        let user = map(json!({ "name": "kb", "base_url": "http://h:1", "hint": "x", "zeta": 1 }));
        let config = normalize(&user, &SCHEMA, "test").unwrap();

        assert_eq!(config.get("hint"), Some(&json!("x")));
        assert_eq!(SCHEMA.unknown_keys(&user), vec!["hint", "zeta"]);
    }

    #[test]
    fn alias_pointing_to_undeclared_key_is_rejected() {
        const BROKEN: ConfigSchema = ConfigSchema {
            required: &[],
            optional: &[],
            aliases: &[("repo", "repository")],
        };
        let error = normalize(&ConfigMap::new(), &BROKEN, "test").unwrap_err();
        assert!(matches!(error, TriplestoreError::InvalidConfig { ref key, .. } if key == "repo"));
    }

    #[test]
    fn auth_accepts_pair_and_object() {
        let pair = normalize(
            &map(json!({ "name": "a", "base_url": "b", "auth": ["user", "secret"] })),
            &SCHEMA,
            "test",
        )
        .unwrap();
        let object = normalize(
            &map(json!({ "name": "a", "base_url": "b", "auth": { "username": "user", "password": "secret" } })),
            &SCHEMA,
            "test",
        )
        .unwrap();

        let expected = Credentials {
            username: "user".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(pair.auth().unwrap(), Some(expected.clone()));
        assert_eq!(object.auth().unwrap(), Some(expected));
        assert!(!format!("{:?}", pair.auth().unwrap()).contains("secret"));
    }

    #[test]
    fn wrongly_typed_values_are_invalid() {
        let config = normalize(
            &map(json!({ "name": 5, "base_url": "b", "auth": "user:pass", "timeout_ms": "soon" })),
            &SCHEMA,
            "test",
        )
        .unwrap();

        assert!(config.required_str("name").is_err());
        assert!(config.auth().is_err());
        assert!(config.u64("timeout_ms").is_err());
    }
}
