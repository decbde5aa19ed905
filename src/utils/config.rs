//! Config string parsing helper.
//!
//! Protocol-specific config structs implement `Default` and `serde::Deserialize`;
//! callers hand an optional TOML string (as carried on a CLI flag) and the
//! macro below overlays only the fields actually present in that string on
//! top of the struct's defaults.

/// Parses `$config_str` (an `Option<&str>` of TOML text) into `$struct_ty`,
/// starting from `$struct_ty::default()` and overlaying each named field if
/// present in the TOML table. Fields not listed are never touched by the
/// config string even if present in it -- an explicit per-field allowlist
/// rather than a blanket `Deserialize`, so a typo'd config key is silently
/// ignored rather than rejected.
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $struct_ty:ty; $($field:ident),+ $(,)?) => {{
        (|| -> Result<$struct_ty, $crate::utils::RaftError> {
            let mut config = <$struct_ty>::default();
            if let Some(s) = $config_str {
                let value: toml::Value = s
                    .parse()
                    .map_err(|e| $crate::utils::RaftError::Config(format!(
                        "failed to parse config string: {}", e
                    )))?;
                if let toml::Value::Table(table) = value {
                    $(
                        if let Some(v) = table.get(stringify!($field)) {
                            config.$field = v.clone().try_into().map_err(|e| {
                                $crate::utils::RaftError::Config(format!(
                                    "invalid value for '{}': {}",
                                    stringify!($field), e
                                ))
                            })?;
                        }
                    )+
                }
            }
            Ok(config)
        })()
    }};
}

#[cfg(test)]
mod tests {
    use crate::utils::RaftError;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Demo {
        a: u64,
        b: String,
    }

    impl Default for Demo {
        fn default() -> Self {
            Demo { a: 1, b: "x".into() }
        }
    }

    #[test]
    fn overlay_known_fields() -> Result<(), RaftError> {
        let cfg = parsed_config!(Some("a = 42") => Demo; a, b)?;
        assert_eq!(cfg, Demo { a: 42, b: "x".into() });
        Ok(())
    }

    #[test]
    fn no_config_uses_defaults() -> Result<(), RaftError> {
        let cfg = parsed_config!(None::<&str> => Demo; a, b)?;
        assert_eq!(cfg, Demo::default());
        Ok(())
    }
}
