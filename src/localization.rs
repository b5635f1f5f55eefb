use anyhow::{anyhow, Result};
use fluent_bundle::{FluentArgs, FluentBundle, FluentResource, FluentValue};
use std::collections::HashMap;
use unic_langid::LanguageIdentifier;

use crate::derivation::Advisory;

/// Language used when a requested one is not available
pub const DEFAULT_LANGUAGE: &str = "en";

const RESOURCES: [(&str, &str); 2] = [
    ("en", include_str!("../locales/en/main.ftl")),
    ("fr", include_str!("../locales/fr/main.ftl")),
];

/// Localization manager for the batch calculator
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
    language: String,
}

impl LocalizationManager {
    /// Create a localization manager using the default language
    pub fn new() -> Result<Self> {
        Self::with_language(DEFAULT_LANGUAGE)
    }

    /// Create a localization manager for a preferred language
    pub fn with_language(language: &str) -> Result<Self> {
        let mut bundles = HashMap::new();
        for (code, source) in RESOURCES {
            let locale: LanguageIdentifier = code.parse()?;
            bundles.insert(code.to_string(), Self::create_bundle(&locale, source)?);
        }

        let language = if bundles.contains_key(language) {
            language.to_string()
        } else {
            DEFAULT_LANGUAGE.to_string()
        };

        Ok(Self { bundles, language })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(locale: &LanguageIdentifier, source: &str) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new(vec![locale.clone()]);
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid {} resource: {:?}", locale, errors))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Conflicting {} messages: {:?}", locale, errors))?;

        Ok(bundle)
    }

    /// Active language code
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Get a localized message in a specific language, falling back to English
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let Some(bundle) = self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        else {
            return format!("Missing translation: {}", key);
        };

        let pattern = match bundle.get_message(key).and_then(|msg| msg.value()) {
            Some(pattern) => pattern,
            None => return format!("Missing translation: {}", key),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            log::debug!("Formatting '{}' reported {:?}", key, errors);
        }
        value.into_owned()
    }

    /// Get a localized message in the active language
    pub fn get_message(&self, key: &str, args: Option<&HashMap<&str, &str>>) -> String {
        self.get_message_in_language(key, &self.language, args)
    }

    /// Message without arguments
    pub fn t(&self, key: &str) -> String {
        self.get_message(key, None)
    }

    /// Message with simple string arguments
    pub fn t_args(&self, key: &str, args: &[(&str, &str)]) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message(key, Some(&args_map))
    }

    /// User-facing text for an advisory
    pub fn advisory_message(&self, advisory: &Advisory) -> String {
        match advisory {
            Advisory::PercentageOverflow { index, percentage } => self.t_args(
                "advisory-percentage-overflow",
                &[("index", &(index + 1).to_string()), ("percentage", &format!("{percentage:.2}"))],
            ),
            Advisory::PercentageSumOverflow { total } => {
                self.t_args("advisory-percentage-sum-overflow", &[("total", &format!("{total:.2}"))])
            }
            Advisory::PercentageSumMismatch { total } => {
                self.t_args("advisory-percentage-sum-mismatch", &[("total", &format!("{total:.2}"))])
            }
            Advisory::LockedField { index, field } => self.t_args(
                "advisory-locked-field",
                &[("index", &(index + 1).to_string()), ("field", field.label())],
            ),
            Advisory::UnknownIngredient { index } => {
                self.t_args("advisory-unknown-ingredient", &[("index", &(index + 1).to_string())])
            }
            Advisory::IgnoredInMode { edit } => {
                self.t_args("advisory-ignored-in-mode", &[("edit", edit.as_str())])
            }
            Advisory::UnresolvedBatchWeight => self.t("advisory-unresolved-batch-weight"),
            Advisory::BatchWeightMismatch { requested, ingredients } => self.t_args(
                "advisory-batch-weight-mismatch",
                &[
                    ("requested", &format!("{requested:.2}")),
                    ("ingredients", &format!("{ingredients:.2}")),
                ],
            ),
            Advisory::StaleSettle { token } => {
                self.t_args("advisory-stale-settle", &[("token", &token.to_string())])
            }
        }
    }
}
