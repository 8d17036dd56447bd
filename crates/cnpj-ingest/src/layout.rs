//! Layout registry for the open CNPJ data files
//!
//! Every archive kind published by the registry has a fixed field order (the
//! files carry no header row), a set of `YYYYMMDD` date columns, a destination
//! table, and a table class:
//!
//! - **Domain** tables (`codigo`, `descricao`) are classification code lists
//!   with no competence dimension. A reload replaces their whole content.
//! - **Versioned** tables are append-only and every row carries the
//!   `competencia` it was published in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the column appended to rows of versioned tables
pub const COMPETENCE_COLUMN: &str = "competencia";

/// Table name of the audit log
pub const AUDIT_TABLE: &str = "cnpj_carga_log";

const DOMAIN_COLUMNS: &[&str] = &["codigo", "descricao"];

const EMPRESA_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "razao_social",
    "natureza_juridica",
    "qualificacao_responsavel",
    "capital_social",
    "porte",
    "ente_federativo_responsavel",
];

const ESTABELECIMENTO_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "cnpj_ordem",
    "cnpj_dv",
    "identificador_matriz_filial",
    "nome_fantasia",
    "situacao_cadastral",
    "data_situacao_cadastral",
    "motivo_situacao_cadastral",
    "nome_cidade_exterior",
    "pais",
    "data_inicio_atividade",
    "cnae_fiscal_principal",
    "cnae_fiscal_secundaria",
    "tipo_logradouro",
    "logradouro",
    "numero",
    "complemento",
    "bairro",
    "cep",
    "uf",
    "municipio",
    "ddd1",
    "telefone1",
    "ddd2",
    "telefone2",
    "ddd_fax",
    "fax",
    "correio_eletronico",
    "situacao_especial",
    "data_situacao_especial",
];

const SOCIO_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "identificador_socio",
    "nome_socio",
    "cnpj_cpf_socio",
    "qualificacao_socio",
    "data_entrada_sociedade",
    "pais",
    "representante_legal",
    "nome_representante",
    "qualificacao_representante",
    "faixa_etaria",
];

const SIMPLES_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "opcao_simples",
    "data_opcao_simples",
    "data_exclusao_simples",
    "opcao_mei",
    "data_opcao_mei",
    "data_exclusao_mei",
];

/// Kind of entity carried by one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Establishment,
    Partner,
    SimplifiedTaxRegime,
    Activity,
    Municipality,
    Country,
    LegalNature,
    QualificationRole,
    DeregistrationReason,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Company,
        EntityKind::Establishment,
        EntityKind::Partner,
        EntityKind::SimplifiedTaxRegime,
        EntityKind::Activity,
        EntityKind::Municipality,
        EntityKind::Country,
        EntityKind::LegalNature,
        EntityKind::QualificationRole,
        EntityKind::DeregistrationReason,
    ];

    /// Layout registered for this kind
    pub fn layout(self) -> &'static Layout {
        // LAYOUTS is declared in variant order
        &LAYOUTS[self as usize]
    }

    pub fn is_domain(self) -> bool {
        self.layout().domain
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Establishment => "establishment",
            EntityKind::Partner => "partner",
            EntityKind::SimplifiedTaxRegime => "simplified_tax_regime",
            EntityKind::Activity => "activity",
            EntityKind::Municipality => "municipality",
            EntityKind::Country => "country",
            EntityKind::LegalNature => "legal_nature",
            EntityKind::QualificationRole => "qualification_role",
            EntityKind::DeregistrationReason => "deregistration_reason",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown entity kind: {s}"))
    }
}

/// Static description of one source file layout
#[derive(Debug)]
pub struct Layout {
    pub kind: EntityKind,
    /// File-name prefix published by the registry (`Empresas3.zip` -> `Empresas`)
    pub prefix: &'static str,
    pub table: &'static str,
    /// Source field order
    pub columns: &'static [&'static str],
    pub date_columns: &'static [&'static str],
    pub domain: bool,
}

impl Layout {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.date_columns.contains(&column)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    /// Columns written to the destination table, in order
    ///
    /// Versioned kinds get the competence column appended.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut columns = self.columns.to_vec();
        if !self.domain {
            columns.push(COMPETENCE_COLUMN);
        }
        columns
    }
}

/// All layouts, in classification order
pub static LAYOUTS: [Layout; 10] = [
    Layout {
        kind: EntityKind::Company,
        prefix: "Empresas",
        table: "cnpj_empresa",
        columns: EMPRESA_COLUMNS,
        date_columns: &[],
        domain: false,
    },
    Layout {
        kind: EntityKind::Establishment,
        prefix: "Estabelecimentos",
        table: "cnpj_estabelecimento",
        columns: ESTABELECIMENTO_COLUMNS,
        date_columns: &[
            "data_situacao_cadastral",
            "data_inicio_atividade",
            "data_situacao_especial",
        ],
        domain: false,
    },
    Layout {
        kind: EntityKind::Partner,
        prefix: "Socios",
        table: "cnpj_socio",
        columns: SOCIO_COLUMNS,
        date_columns: &["data_entrada_sociedade"],
        domain: false,
    },
    Layout {
        kind: EntityKind::SimplifiedTaxRegime,
        prefix: "Simples",
        table: "cnpj_simples",
        columns: SIMPLES_COLUMNS,
        date_columns: &[
            "data_opcao_simples",
            "data_exclusao_simples",
            "data_opcao_mei",
            "data_exclusao_mei",
        ],
        domain: false,
    },
    Layout {
        kind: EntityKind::Activity,
        prefix: "Cnaes",
        table: "cnpj_cnae",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
    Layout {
        kind: EntityKind::Municipality,
        prefix: "Municipios",
        table: "cnpj_municipio",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
    Layout {
        kind: EntityKind::Country,
        prefix: "Paises",
        table: "cnpj_pais",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
    Layout {
        kind: EntityKind::LegalNature,
        prefix: "Naturezas",
        table: "cnpj_natureza",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
    Layout {
        kind: EntityKind::QualificationRole,
        prefix: "Qualificacoes",
        table: "cnpj_qualificacao",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
    Layout {
        kind: EntityKind::DeregistrationReason,
        prefix: "Motivos",
        table: "cnpj_motivo",
        columns: DOMAIN_COLUMNS,
        date_columns: &[],
        domain: true,
    },
];

/// Tables of the given class
pub fn tables(domain: bool) -> impl Iterator<Item = &'static str> {
    LAYOUTS
        .iter()
        .filter(move |layout| layout.domain == domain)
        .map(|layout| layout.table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_its_own_layout() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.layout().kind, kind);
        }
    }

    #[test]
    fn test_versioned_layout_widths() {
        assert_eq!(EntityKind::Company.layout().width(), 7);
        assert_eq!(EntityKind::Establishment.layout().width(), 30);
        assert_eq!(EntityKind::Partner.layout().width(), 11);
        assert_eq!(EntityKind::SimplifiedTaxRegime.layout().width(), 7);
    }

    #[test]
    fn test_date_columns_belong_to_layout() {
        for layout in &LAYOUTS {
            for date in layout.date_columns {
                assert!(layout.column_index(date).is_some(), "{} missing {date}", layout.table);
            }
        }
    }

    #[test]
    fn test_insert_columns_append_competence_for_versioned_only() {
        let socio = EntityKind::Partner.layout().insert_columns();
        assert_eq!(socio.last(), Some(&COMPETENCE_COLUMN));
        assert_eq!(socio.len(), 12);

        let cnae = EntityKind::Activity.layout().insert_columns();
        assert_eq!(cnae, vec!["codigo", "descricao"]);
    }

    #[test]
    fn test_domain_and_versioned_tables() {
        assert_eq!(tables(true).count(), 6);
        let versioned: Vec<_> = tables(false).collect();
        assert_eq!(
            versioned,
            vec!["cnpj_empresa", "cnpj_estabelecimento", "cnpj_socio", "cnpj_simples"]
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("partner".parse::<EntityKind>().unwrap(), EntityKind::Partner);
        assert_eq!("Activity".parse::<EntityKind>().unwrap(), EntityKind::Activity);
        assert!("branch".parse::<EntityKind>().is_err());
    }
}
