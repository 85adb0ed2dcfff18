/// A CRS name as it appears on the wire: an EPSG code, a URN, a URL, or inline WKT.
/// Kept as an opaque string at the model layer; only the reprojector asks the `proj`
/// crate to resolve one into an actual transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrsName(pub String);

impl CrsName {
    pub fn epsg(code: u32) -> Self {
        CrsName(format!("EPSG:{code}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CrsName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
