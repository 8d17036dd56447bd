//! Archive file classification
//!
//! Maps a published file name to the entity kind it carries. Partitioned kinds
//! use a trailing digit (`Empresas0.zip` .. `Empresas9.zip`), reference kinds
//! have a single file (`Cnaes.zip`).

use std::path::Path;

use crate::error::{IngestError, Result};
use crate::layout::{EntityKind, LAYOUTS};

/// Classify a file name (not a full path) by prefix, first match wins
pub fn classify(file_name: &str) -> Option<EntityKind> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    LAYOUTS
        .iter()
        .find(|layout| stem.starts_with(layout.prefix))
        .map(|layout| layout.kind)
}

/// Like [`classify`], but an unknown name becomes an [`IngestError::Unrecognized`]
pub fn classify_or_err(file_name: &str) -> Result<EntityKind> {
    classify(file_name).ok_or_else(|| IngestError::Unrecognized(file_name.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioned_files() {
        assert_eq!(classify("Empresas0.zip"), Some(EntityKind::Company));
        assert_eq!(classify("Estabelecimentos9.zip"), Some(EntityKind::Establishment));
        assert_eq!(classify("Socios3.zip"), Some(EntityKind::Partner));
    }

    #[test]
    fn test_reference_files() {
        assert_eq!(classify("Cnaes.zip"), Some(EntityKind::Activity));
        assert_eq!(classify("Municipios.zip"), Some(EntityKind::Municipality));
        assert_eq!(classify("Paises.zip"), Some(EntityKind::Country));
        assert_eq!(classify("Naturezas.zip"), Some(EntityKind::LegalNature));
        assert_eq!(classify("Qualificacoes.zip"), Some(EntityKind::QualificationRole));
        assert_eq!(classify("Motivos.zip"), Some(EntityKind::DeregistrationReason));
        assert_eq!(classify("Simples.zip"), Some(EntityKind::SimplifiedTaxRegime));
    }

    #[test]
    fn test_extension_is_ignored() {
        assert_eq!(classify("Cnaes"), Some(EntityKind::Activity));
        assert_eq!(classify("Socios1.ZIP"), Some(EntityKind::Partner));
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(classify("Leiaute.zip"), None);
        assert_eq!(classify("empresas0.zip"), None);

        let err = classify_or_err("Leiaute.zip").unwrap_err();
        assert!(err.to_string().contains("Leiaute.zip"));
    }
}
