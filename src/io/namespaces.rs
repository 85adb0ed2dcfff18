use crate::model::CityGmlVersion;

/// Prefix/URI table for the three supported CityGML versions: a plain built-in
/// default that an `--extensions <dir>` directory of additional declarations can
/// extend.
pub fn namespace_table(version: CityGmlVersion) -> Vec<(String, String)> {
    let mut table = vec![
        ("gml".to_string(), "http://www.opengis.net/gml/3.2".to_string()),
        ("xlink".to_string(), "http://www.w3.org/1999/xlink".to_string()),
        ("xsi".to_string(), "http://www.w3.org/2001/XMLSchema-instance".to_string()),
    ];
    match version {
        CityGmlVersion::V1 => {
            table.push(("core".to_string(), "http://www.opengis.net/citygml/1.0".to_string()));
            table.push(("bldg".to_string(), "http://www.opengis.net/citygml/building/1.0".to_string()));
            table.push(("app".to_string(), "http://www.opengis.net/citygml/appearance/1.0".to_string()));
            table.push(("grp".to_string(), "http://www.opengis.net/citygml/cityobjectgroup/1.0".to_string()));
        }
        CityGmlVersion::V2 => {
            table.push(("core".to_string(), "http://www.opengis.net/citygml/2.0".to_string()));
            table.push(("bldg".to_string(), "http://www.opengis.net/citygml/building/2.0".to_string()));
            table.push(("app".to_string(), "http://www.opengis.net/citygml/appearance/2.0".to_string()));
            table.push(("grp".to_string(), "http://www.opengis.net/citygml/cityobjectgroup/2.0".to_string()));
        }
        CityGmlVersion::V3 => {
            table.push(("core".to_string(), "http://www.opengis.net/citygml/3.0".to_string()));
            table.push(("bldg".to_string(), "http://www.opengis.net/citygml/building/3.0".to_string()));
            table.push(("app".to_string(), "http://www.opengis.net/citygml/appearance/3.0".to_string()));
            table.push(("grp".to_string(), "http://www.opengis.net/citygml/cityobjectgroup/3.0".to_string()));
        }
    }
    table
}

/// Best-effort detection of the document's declared CityGML version from a raw
/// namespace URI, so a namespace map with the declared version is available before
/// the first chunk is read.
pub fn version_from_namespace(uri: &str) -> Option<CityGmlVersion> {
    if uri.contains("/citygml/3.0") {
        Some(CityGmlVersion::V3)
    } else if uri.contains("/citygml/2.0") {
        Some(CityGmlVersion::V2)
    } else if uri.contains("/citygml/1.0") {
        Some(CityGmlVersion::V1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_detection_from_core_namespace() {
        assert_eq!(
            version_from_namespace("http://www.opengis.net/citygml/2.0"),
            Some(CityGmlVersion::V2)
        );
        assert_eq!(version_from_namespace("http://example.com/other"), None);
    }
}
