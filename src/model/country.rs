use std::collections::HashMap;

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{Country, CountryExtension, ExtensionFieldsType},
};

/**
 * Country-specific business rules applied to site writes. The site service
 * interprets these against the persisted state; the rules themselves are
 * evaluated by the pure validators.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRule {
    /**
     * At most one site of this country per installation date.
     */
    UniqueInstallationDate,
    /**
     * Installation date must fall on a Saturday or Sunday.
     */
    WeekendInstallation,
}

/**
 * The behavior bundle registered for one country: how to resolve the raw
 * extension fields into a typed extension record, and which country-specific
 * rules apply to site writes.
 */
#[derive(Debug)]
pub struct CountrySpec {
    /**
     * The country this spec is registered for.
     */
    pub country: Country,
    /**
     * Resolves the raw optional field set into this country's extension
     * record, rejecting fields that belong to another country.
     */
    resolve: fn(&ExtensionFieldsType) -> Result<CountryExtension, ApplicationError>,
    /**
     * Country-specific rules folded into the validation pipeline.
     */
    pub rules: &'static [SiteRule],
}

impl CountrySpec {
    pub fn new(country: Country, resolve: fn(&ExtensionFieldsType) -> Result<CountryExtension, ApplicationError>, rules: &'static [SiteRule]) -> Self {
        CountrySpec { country, resolve, rules }
    }

    /**
     * Resolves the raw extension fields against this country's schema.
     *
     * # Arguments
     * `fields`: The raw optional extension field set from the request.
     *
     * # Returns
     * The typed extension record, or `SchemaMismatch` when fields of another
     * country are present or required fields are missing.
     */
    pub fn resolve_extension(&self, fields: &ExtensionFieldsType) -> Result<CountryExtension, ApplicationError> {
        (self.resolve)(fields)
    }
}

/**
 * Registry of country specs. Read-only after startup; adding a country means
 * registering a new spec here, not editing site or group code.
 */
pub struct CountryRegistry {
    specs: HashMap<Country, CountrySpec>,
}

impl CountryRegistry {
    /**
     * Creates a registry with the currently supported countries registered.
     */
    pub fn with_defaults() -> Self {
        let mut registry = CountryRegistry { specs: HashMap::new() };
        registry.register(CountrySpec::new(Country::France, resolve_france, &[SiteRule::UniqueInstallationDate]));
        registry.register(CountrySpec::new(Country::Italy, resolve_italy, &[SiteRule::WeekendInstallation]));
        registry
    }

    /**
     * Registers a country spec, replacing any previous registration.
     */
    pub fn register(&mut self, spec: CountrySpec) {
        self.specs.insert(spec.country, spec);
    }

    /**
     * Looks up the spec for a country discriminator.
     *
     * # Returns
     * The registered spec or an `UnknownCountry` error.
     */
    pub fn lookup(&self, country: Country) -> Result<&CountrySpec, ApplicationError> {
        self.specs.get(&country).ok_or_else(|| ApplicationError::new(ErrorType::UnknownCountry, format!("No country spec registered for {}", country.as_str())))
    }
}

/**
 * Resolves the extension fields for a French site. Requires
 * `useful_energy_at_1_megawatt`; the Italian `efficiency` field must be
 * absent.
 */
fn resolve_france(fields: &ExtensionFieldsType) -> Result<CountryExtension, ApplicationError> {
    if fields.efficiency.is_some() {
        return Err(ApplicationError::new(ErrorType::SchemaMismatch, "Field efficiency does not apply to French sites".to_string()));
    }
    let useful_energy_at_1_megawatt = fields
        .useful_energy_at_1_megawatt
        .ok_or_else(|| ApplicationError::new(ErrorType::SchemaMismatch, "French sites require field usefulEnergyAt1Megawatt".to_string()))?;
    if useful_energy_at_1_megawatt < 0.0 {
        return Err(ApplicationError::new(ErrorType::Validation, "Field usefulEnergyAt1Megawatt must not be negative".to_string()));
    }
    Ok(CountryExtension::France { useful_energy_at_1_megawatt })
}

/**
 * Resolves the extension fields for an Italian site. Requires `efficiency`
 * in the range 0 to 1; the French energy field must be absent.
 */
fn resolve_italy(fields: &ExtensionFieldsType) -> Result<CountryExtension, ApplicationError> {
    if fields.useful_energy_at_1_megawatt.is_some() {
        return Err(ApplicationError::new(ErrorType::SchemaMismatch, "Field usefulEnergyAt1Megawatt does not apply to Italian sites".to_string()));
    }
    let efficiency = fields.efficiency.ok_or_else(|| ApplicationError::new(ErrorType::SchemaMismatch, "Italian sites require field efficiency".to_string()))?;
    if !(0.0..=1.0).contains(&efficiency) {
        return Err(ApplicationError::new(ErrorType::Validation, format!("Field efficiency must be between 0 and 1, got {efficiency}")));
    }
    Ok(CountryExtension::Italy { efficiency })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_have_france_and_italy() {
        let registry = CountryRegistry::with_defaults();
        let france = registry.lookup(Country::France).unwrap();
        assert_eq!(france.rules, &[SiteRule::UniqueInstallationDate]);
        let italy = registry.lookup(Country::Italy).unwrap();
        assert_eq!(italy.rules, &[SiteRule::WeekendInstallation]);
    }

    #[test]
    fn test_lookup_unregistered_country() {
        let registry = CountryRegistry { specs: HashMap::new() };
        let err = registry.lookup(Country::France).unwrap_err();
        assert_eq!(err.error_type, ErrorType::UnknownCountry);
    }

    #[test]
    fn test_resolve_france() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::France).unwrap();
        let extension = spec.resolve_extension(&ExtensionFieldsType { useful_energy_at_1_megawatt: Some(2.0), efficiency: None }).unwrap();
        assert_eq!(extension, CountryExtension::France { useful_energy_at_1_megawatt: 2.0 });
    }

    #[test]
    fn test_resolve_france_missing_required_field() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::France).unwrap();
        let err = spec.resolve_extension(&ExtensionFieldsType::default()).unwrap_err();
        assert_eq!(err.error_type, ErrorType::SchemaMismatch);
    }

    #[test]
    fn test_resolve_france_rejects_italian_field() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::France).unwrap();
        let err = spec.resolve_extension(&ExtensionFieldsType { useful_energy_at_1_megawatt: Some(2.0), efficiency: Some(0.5) }).unwrap_err();
        assert_eq!(err.error_type, ErrorType::SchemaMismatch);
    }

    #[test]
    fn test_resolve_italy() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::Italy).unwrap();
        let extension = spec.resolve_extension(&ExtensionFieldsType { useful_energy_at_1_megawatt: None, efficiency: Some(0.8) }).unwrap();
        assert_eq!(extension, CountryExtension::Italy { efficiency: 0.8 });
    }

    #[test]
    fn test_resolve_italy_efficiency_out_of_range() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::Italy).unwrap();
        let err = spec.resolve_extension(&ExtensionFieldsType { useful_energy_at_1_megawatt: None, efficiency: Some(1.5) }).unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
    }

    #[test]
    fn test_resolve_italy_rejects_french_field() {
        let registry = CountryRegistry::with_defaults();
        let spec = registry.lookup(Country::Italy).unwrap();
        let err = spec.resolve_extension(&ExtensionFieldsType { useful_energy_at_1_megawatt: Some(2.0), efficiency: Some(0.8) }).unwrap_err();
        assert_eq!(err.error_type, ErrorType::SchemaMismatch);
    }
}
