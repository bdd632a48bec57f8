pub mod click;

pub use click::{ClickEvent, DeviceType, GeoFields, NewClick};
