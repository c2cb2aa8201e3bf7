//! Per-provider field-name schemas
//!
//! Every log backend indexes the same download event under its own field
//! names. The registry is the only place that knows those names; everything
//! downstream asks for a [`CanonicalField`] and gets the backend's spelling.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Suffix of the exact-match (non-analyzed) sub-field on string fields
pub const DEFAULT_KEYWORD_SUFFIX: &str = ".keyword";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("provider '{provider}' has no mapping for field '{field}'")]
    MissingField {
        provider: String,
        field: CanonicalField,
    },
}

const FIELD_COUNT: usize = 7;

/// Fields every provider must map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    GeoCountry,
    Bytes,
    VirtualHost,
    RequestPath,
    Timestamp,
    RequestMethod,
    ClientAddress,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; FIELD_COUNT] = [
        CanonicalField::GeoCountry,
        CanonicalField::Bytes,
        CanonicalField::VirtualHost,
        CanonicalField::RequestPath,
        CanonicalField::Timestamp,
        CanonicalField::RequestMethod,
        CanonicalField::ClientAddress,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::GeoCountry => "geo_country",
            CanonicalField::Bytes => "bytes",
            CanonicalField::VirtualHost => "vhost",
            CanonicalField::RequestPath => "uri",
            CanonicalField::Timestamp => "timestamp",
            CanonicalField::RequestMethod => "request_method",
            CanonicalField::ClientAddress => "client_ip",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log backend and the names it uses for each canonical field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    name: String,
    fields: [String; FIELD_COUNT],
    host_filter_value: String,
    index_pattern: String,
    keyword_suffix: String,
}

impl Provider {
    pub fn builder(name: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend field name for a canonical field
    pub fn field(&self, field: CanonicalField) -> &str {
        &self.fields[field.index()]
    }

    /// Exact-match sub-field used for terms aggregations and regexps
    pub fn keyword_field(&self, field: CanonicalField) -> String {
        format!("{}{}", self.field(field), self.keyword_suffix)
    }

    /// Virtual host this provider's documents must be served from
    pub fn host_filter_value(&self) -> &str {
        &self.host_filter_value
    }

    pub fn index_pattern(&self) -> &str {
        &self.index_pattern
    }
}

pub struct ProviderBuilder {
    name: String,
    fields: [Option<String>; FIELD_COUNT],
    host_filter_value: Option<String>,
    index_pattern: Option<String>,
    keyword_suffix: String,
}

impl ProviderBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Default::default(),
            host_filter_value: None,
            index_pattern: None,
            keyword_suffix: DEFAULT_KEYWORD_SUFFIX.to_string(),
        }
    }

    pub fn field(mut self, field: CanonicalField, backend_name: impl Into<String>) -> Self {
        self.fields[field.index()] = Some(backend_name.into());
        self
    }

    pub fn host_filter_value(mut self, value: impl Into<String>) -> Self {
        self.host_filter_value = Some(value.into());
        self
    }

    /// Defaults to `<name>-*`
    pub fn index_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.index_pattern = Some(pattern.into());
        self
    }

    /// Fails unless every canonical field has a non-empty backend name
    pub fn build(self) -> Result<Provider, SchemaError> {
        let mut fields: [String; FIELD_COUNT] = Default::default();
        for field in CanonicalField::ALL {
            match &self.fields[field.index()] {
                Some(name) if !name.is_empty() => fields[field.index()] = name.clone(),
                _ => {
                    return Err(SchemaError::MissingField {
                        provider: self.name,
                        field,
                    })
                }
            }
        }

        let host_filter_value = self
            .host_filter_value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SchemaError::MissingField {
                provider: self.name.clone(),
                field: CanonicalField::VirtualHost,
            })?;

        let index_pattern = self
            .index_pattern
            .unwrap_or_else(|| format!("{}-*", self.name));

        Ok(Provider {
            name: self.name,
            fields,
            host_filter_value,
            index_pattern,
            keyword_suffix: self.keyword_suffix,
        })
    }
}

/// Ordered, read-only set of providers
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    providers: Vec<Arc<Provider>>,
}

impl SchemaRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers: providers.into_iter().map(Arc::new).collect(),
        }
    }

    /// The CDN and origin-server log stores
    pub fn builtin() -> Self {
        Self::new(vec![fastly(), loggy()])
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Provider>, SchemaError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| SchemaError::UnknownProvider(name.to_string()))
    }

    /// Restrict the registry to the named providers, in the order given
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, SchemaError> {
        let providers = names
            .iter()
            .map(|name| self.get(name.as_ref()).map(Arc::clone))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { providers })
    }

    pub fn providers(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn fastly() -> Provider {
    builtin_provider(
        "fastly",
        [
            (CanonicalField::GeoCountry, "geo_country_code"),
            (CanonicalField::Bytes, "response_body_size"),
            (CanonicalField::VirtualHost, "vhost"),
            (CanonicalField::RequestPath, "url"),
            (CanonicalField::Timestamp, "timestamp"),
            (CanonicalField::RequestMethod, "request"),
            (CanonicalField::ClientAddress, "client_ip"),
        ],
        "dlcdn.apache.org",
    )
}

fn loggy() -> Provider {
    builtin_provider(
        "loggy",
        [
            (CanonicalField::GeoCountry, "geo_country"),
            (CanonicalField::Bytes, "bytes"),
            (CanonicalField::VirtualHost, "vhost"),
            (CanonicalField::RequestPath, "uri"),
            (CanonicalField::Timestamp, "@timestamp"),
            (CanonicalField::RequestMethod, "request_method"),
            (CanonicalField::ClientAddress, "client_ip"),
        ],
        "downloads.apache.org",
    )
}

fn builtin_provider(
    name: &str,
    fields: [(CanonicalField, &str); FIELD_COUNT],
    vhost: &str,
) -> Provider {
    let mut builder = Provider::builder(name).host_filter_value(vhost);
    for (field, backend_name) in fields {
        builder = builder.field(field, backend_name);
    }
    match builder.build() {
        Ok(provider) => provider,
        // Built-in tables are covered by `builtin_tables_are_complete`
        Err(e) => unreachable!("built-in provider table is incomplete: {e}"),
    }
}
