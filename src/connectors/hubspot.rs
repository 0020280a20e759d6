//! Push warehouse data to HubSpot and keep the HubSpot portals tidy.

pub mod client;
pub mod missing_columns;
pub mod send;
pub mod tickets;

use log::info;

use crate::{
    error::{Error, Result},
    wherescape::WhereScape,
};

pub use client::Hubspot;

/// The CRM object types the warehouse sends data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Companies,
    Contacts,
    Deals,
    Tickets,
}

impl ObjectType {
    pub const ALL: [ObjectType; 4] = [
        ObjectType::Companies,
        ObjectType::Contacts,
        ObjectType::Deals,
        ObjectType::Tickets,
    ];

    /// Tables are named after the singular, e.g. `export_hubspot_company`.
    pub fn from_table_name(table: &str) -> Result<ObjectType> {
        let table = table.to_lowercase();
        [ObjectType::Companies, ObjectType::Contacts, ObjectType::Deals]
            .into_iter()
            .find(|o| table.contains(o.singular()))
            .ok_or_else(|| Error::UnknownObjectType {
                connector: "hubspot".to_string(),
                table,
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Companies => "companies",
            ObjectType::Contacts => "contacts",
            ObjectType::Deals => "deals",
            ObjectType::Tickets => "tickets",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            ObjectType::Companies => "company",
            ObjectType::Contacts => "contact",
            ObjectType::Deals => "deal",
            ObjectType::Tickets => "ticket",
        }
    }
}

/// The access token for a table.  Every word of the table name can select a
/// portal, e.g. `load_hubspot_voys_companies` uses
/// `hubspot_access_token_voys` if that parameter exists.  Development
/// repositories look for a `_dev` token first.
pub fn hubspot_get_token(ws: &WhereScape, table_name: &str, develop_env: bool) -> Result<String> {
    for word in table_name.split('_').filter(|w| !w.is_empty()) {
        if develop_env {
            let token = ws.read_parameter(&format!("hubspot_access_token_{}_dev", word))?;
            if !token.is_empty() {
                info!("Using the development token for {}", word);
                return Ok(token);
            }
        }
        let token = ws.read_parameter(&format!("hubspot_access_token_{}", word))?;
        if !token.is_empty() {
            info!("Using the token for {}", word);
            return Ok(token);
        }
    }
    let name = if develop_env {
        "hubspot_access_token_dev"
    } else {
        "hubspot_access_token"
    };
    ws.read_parameter(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wherescape::fixtures::instance;

    #[test]
    fn object_type() {
        assert_eq!(
            ObjectType::from_table_name("export_hubspot_company").unwrap(),
            ObjectType::Companies
        );
        assert_eq!(
            ObjectType::from_table_name("Stage_Hubspot_Deal_Updates").unwrap(),
            ObjectType::Deals
        );
        assert!(matches!(
            ObjectType::from_table_name("export_hubspot_ticket"),
            Err(Error::UnknownObjectType { .. })
        ));
    }

    #[test]
    fn token_lookup() -> Result<()> {
        let ws = instance(
            "x",
            "load",
            r#"
INSERT INTO dss_parameter VALUES ('hubspot_access_token', 'default', '');
INSERT INTO dss_parameter VALUES ('hubspot_access_token_dev', 'default-dev', '');
INSERT INTO dss_parameter VALUES ('hubspot_access_token_voys', 'voys', '');
INSERT INTO dss_parameter VALUES ('hubspot_access_token_voys_dev', 'voys-dev', '');
"#,
            "",
        );
        assert_eq!(hubspot_get_token(&ws, "load_hubspot_voys_companies", false)?, "voys");
        assert_eq!(hubspot_get_token(&ws, "load_hubspot_voys_companies", true)?, "voys-dev");
        assert_eq!(hubspot_get_token(&ws, "export_hubspot_deal", false)?, "default");
        assert_eq!(hubspot_get_token(&ws, "export_hubspot_deal", true)?, "default-dev");
        Ok(())
    }
}
