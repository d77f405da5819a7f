//! Parse an Apache access log into tab separated fields.

use crate::error::Result;
use crate::flow::{Flow, FlowConnector};
use crate::tap::{Scheme, Tap};

pub fn flow(connector: &FlowConnector, input: &str, output: &str) -> Result<Flow> {
    let import = super::apache_import("import")?;
    connector.connect(
        "logparser",
        Tap::new(Scheme::text_line(), input),
        Tap::new(Scheme::text_line(), output),
        import,
    )
}
