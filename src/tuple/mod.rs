//! Record model: field sets, typed values and the records built from them.

pub mod fields;
pub mod record;
pub mod value;

pub use fields::FieldSet;
pub use record::Record;
pub use value::Value;
