//! connection parameters and connecting to the LDAP server the bulk
//! membership run operates on

use derive_builder::Builder;
use dirs::home_dir;
use lazy_static::lazy_static;
use ldap3::{Ldap, LdapConnAsync, Scope};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

use crate::directory::{first_attribute_value, ldap_search};
use crate::error::DirectoryError;

/// a set of parameters for connecting and binding to an LDAP server
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(into))]
pub struct ConnectParameters {
    /// the LDAP URL to connect to
    pub url: std::string::String,
    /// DN for a simple bind, SASL EXTERNAL is used if this is not set
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub bind_dn: Option<std::string::String>,
    /// password for the simple bind
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub bind_password: Option<std::string::String>,
    /// base DN used when a request does not name a user or group base DN
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub base_dn: Option<std::string::String>,
}

/// errors which can happen when trying to retrieve connect parameters from openldap config
#[derive(Debug, Error)]
pub enum OpenLdapConnectParameterError {
    /// an I/O error
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
}

/// apply the `URI`, `BASE` and `BINDDN` lines of an OpenLDAP client config
/// file (ldap.conf or .ldaprc) to the builder
pub fn parse_openldap_config<'b>(
    content: &str,
    builder: &'b mut ConnectParametersBuilder,
) -> &'b mut ConnectParametersBuilder {
    lazy_static! {
        static ref URI_RE: Regex = Regex::new(r"^URI\s+(\S+)").unwrap();
        static ref BASE_RE: Regex = Regex::new(r"^BASE\s+(.*\S)\s*$").unwrap();
        static ref BINDDN_RE: Regex = Regex::new(r"^BINDDN\s+(.*\S)\s*$").unwrap();
    }
    for line in content.lines() {
        if let Some(url) = URI_RE.captures(line).and_then(|caps| caps.get(1)) {
            tracing::debug!("Extracted URI value {}", url.as_str());
            builder.url(url.as_str());
        }
        if let Some(base_dn) = BASE_RE.captures(line).and_then(|caps| caps.get(1)) {
            tracing::debug!("Extracted BASE value {}", base_dn.as_str());
            builder.base_dn(base_dn.as_str());
        }
        if let Some(bind_dn) = BINDDN_RE.captures(line).and_then(|caps| caps.get(1)) {
            tracing::debug!("Extracted BINDDN value {}", bind_dn.as_str());
            builder.bind_dn(bind_dn.as_str());
        }
    }
    builder
}

/// try to detect OpenLDAP connect parameters from its config files
/// (ldap.conf in /etc/ldap or /etc/openldap and .ldaprc in the user home dir)
///
/// values in .ldaprc take precedence over those in ldap.conf
#[instrument(skip(builder))]
pub fn openldap_connect_parameters(
    builder: &mut ConnectParametersBuilder,
) -> Result<&mut ConnectParametersBuilder, OpenLdapConnectParameterError> {
    let mut ldap_conf_filename = Path::new("/etc/ldap/ldap.conf");
    if !ldap_conf_filename.exists() {
        ldap_conf_filename = Path::new("/etc/openldap/ldap.conf");
    }
    if ldap_conf_filename.exists() {
        tracing::debug!("Using ldap.conf at {:?}", ldap_conf_filename);
        let ldap_conf_content = std::fs::read_to_string(ldap_conf_filename)?;
        parse_openldap_config(&ldap_conf_content, builder);
    }

    if let Some(d) = home_dir() {
        let mut ldap_rc_filename = d;
        ldap_rc_filename.push(".ldaprc");
        if ldap_rc_filename.exists() {
            tracing::debug!("Using .ldaprc at {:?}", ldap_rc_filename);
            let ldap_rc_content = std::fs::read_to_string(ldap_rc_filename)?;
            parse_openldap_config(&ldap_rc_content, builder);
        }
    }
    Ok(builder)
}

/// error which can happen while reading connect parameters from a file
#[derive(Debug, Error)]
pub enum TomlConfigError {
    /// an I/O error
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// an error deserializing the TOML file
    #[error("Toml deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// load ldap connect parameters from a toml file
#[instrument]
pub fn toml_connect_parameters(
    filename: std::path::PathBuf,
) -> Result<ConnectParameters, TomlConfigError> {
    let config = std::fs::read_to_string(filename)?;
    let result: ConnectParameters = toml::from_str(&config)?;

    Ok(result)
}

/// errors which can happen when connecting to an LDAP server
#[derive(Debug, Error)]
pub enum ConnectError {
    /// an error when building the parameters, most likely a value
    /// that could not be retrieved from any config source
    #[error("Parameters builder error: {0}")]
    ParametersBuilderError(#[from] ConnectParametersBuilderError),
    /// an error when trying to retrieve connect parameters from OpenLDAP config files
    #[error("Error retrieving OpenLDAP connect parameters: {0}")]
    OpenLdapConnectParameterError(#[from] OpenLdapConnectParameterError),
    /// an error in the ldap3 crate
    #[error("ldap3 Ldap error: {0}")]
    LdapError(#[from] ldap3::LdapError),
    /// an error while querying the RootDSE for the naming context
    #[error("Directory error: {0}")]
    DirectoryError(#[from] DirectoryError),
    /// neither the parameters nor the server named a base DN
    #[error("No base DN configured and the server does not announce a naming context")]
    NoBaseDn,
}

/// try to connect to an LDAP server using ldap3 using the OpenLDAP config files
#[instrument]
pub async fn connect() -> Result<(Ldap, std::string::String), ConnectError> {
    let mut builder = ConnectParametersBuilder::default();
    openldap_connect_parameters(&mut builder)?;
    match builder.build() {
        Ok(result) => connect_with_parameters(result).await,
        Err(err) => {
            tracing::error!(
                "Building of ConnectParameters based on OpenLDAP config files failed: {}",
                err
            );
            Err(ConnectError::ParametersBuilderError(err))
        }
    }
}

/// connect and bind to an LDAP server using ldap3 with the given parameters
///
/// returns the connection and the base DN, which is the configured one or
/// else the first naming context the server announces
#[instrument(skip(connect_parameters), fields(url = %connect_parameters.url))]
pub async fn connect_with_parameters(
    connect_parameters: ConnectParameters,
) -> Result<(Ldap, std::string::String), ConnectError> {
    let (ldap_conn_async, mut ldap) = LdapConnAsync::new(&connect_parameters.url).await?;
    ldap3::drive!(ldap_conn_async);
    match &connect_parameters.bind_dn {
        Some(bind_dn) => {
            tracing::debug!("Simple bind as {}", bind_dn);
            let password = connect_parameters
                .bind_password
                .as_deref()
                .unwrap_or_default();
            ldap.simple_bind(bind_dn, password).await?.success()?;
        }
        None => {
            tracing::debug!("SASL EXTERNAL bind");
            ldap.sasl_external_bind().await?.success()?;
        }
    }
    let base_dn = match connect_parameters.base_dn {
        Some(base_dn) => base_dn,
        None => default_naming_context(&mut ldap)
            .await?
            .ok_or(ConnectError::NoBaseDn)?,
    };
    Ok((ldap, base_dn))
}

/// retrieve the first naming context announced in the RootDSE
#[instrument(skip(ldap))]
pub async fn default_naming_context(
    ldap: &mut Ldap,
) -> Result<Option<std::string::String>, DirectoryError> {
    let entries = ldap_search(
        ldap,
        "",
        Scope::Base,
        "(objectClass=*)",
        vec!["namingContexts".to_string()],
    )
    .await?;
    Ok(entries
        .iter()
        .find_map(|entry| first_attribute_value(entry, "namingContexts"))
        .map(str::to_string))
}
