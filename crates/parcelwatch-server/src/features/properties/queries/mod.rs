pub mod get_property;
pub mod list_properties;

pub use get_property::{GetPropertyError, GetPropertyQuery, PropertyView, ViolationView};
pub use list_properties::{ListPropertiesError, ListPropertiesQuery, ListPropertiesResponse};
