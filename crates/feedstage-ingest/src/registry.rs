//! Record type registry
//!
//! Maps every supported feed type to its schema and tables. This is the only
//! place that names a concrete record type; the staging, insert and delete
//! phases work from a [`TypeDescriptor`] alone.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::ImportError;
use crate::schema::{FieldKind, FieldSpec, Schema, DELETION_FLAG};

const STRAIN_TYPES: &[&str] = &["Indica", "Sativa", "Hybrid"];

static AREA_SCHEMA: Schema = Schema {
    fields: &[
        FieldSpec::required("CreatedBy", FieldKind::Text { max_len: 35 }),
        FieldSpec::optional("UpdatedBy", FieldKind::Text { max_len: 35 }),
        FieldSpec::required("CreatedDate", FieldKind::Date),
        FieldSpec::optional("UpdatedDate", FieldKind::Date),
        FieldSpec::required("LicenseeId", FieldKind::Integer),
        FieldSpec::required("ExternalIdentifier", FieldKind::Text { max_len: 100 }),
        FieldSpec::required("Name", FieldKind::Text { max_len: 75 }),
        FieldSpec::required("AreaId", FieldKind::Integer),
        FieldSpec::required("IsQuarantine", FieldKind::Boolean),
    ],
};

static STRAIN_SCHEMA: Schema = Schema {
    fields: &[
        FieldSpec::required("CreatedBy", FieldKind::Text { max_len: 35 }),
        FieldSpec::optional("UpdatedBy", FieldKind::Text { max_len: 35 }),
        FieldSpec::required("CreatedDate", FieldKind::Date),
        FieldSpec::optional("UpdatedDate", FieldKind::Date),
        FieldSpec::required("LicenseeId", FieldKind::Integer),
        FieldSpec::required("StrainId", FieldKind::Integer),
        FieldSpec::required("AssociateId", FieldKind::Integer),
        FieldSpec::required("StrainType", FieldKind::Enum(STRAIN_TYPES)),
        FieldSpec::required("Name", FieldKind::Text { max_len: 50 }),
    ],
};

static AREA: TypeDescriptor = TypeDescriptor {
    record_type: RecordType::Area,
    schema: &AREA_SCHEMA,
    key_index: 5,
    staging_table: "area_csv",
    table: "areas",
};

static STRAIN: TypeDescriptor = TypeDescriptor {
    record_type: RecordType::Strain,
    schema: &STRAIN_SCHEMA,
    key_index: 5,
    staging_table: "strain_csv",
    table: "strains",
};

/// Supported feed types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Area,
    Strain,
}

impl RecordType {
    pub const ALL: [RecordType; 2] = [RecordType::Area, RecordType::Strain];

    /// Tag used on the command line and in `sources.type`
    pub fn tag(self) -> &'static str {
        match self {
            RecordType::Area => "area",
            RecordType::Strain => "strain",
        }
    }

    pub fn descriptor(self) -> &'static TypeDescriptor {
        match self {
            RecordType::Area => &AREA,
            RecordType::Strain => &STRAIN,
        }
    }

    /// Second half of the advisory lock key; stable across releases
    pub fn lock_key(self) -> i32 {
        match self {
            RecordType::Area => 1,
            RecordType::Strain => 2,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RecordType {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImportError::UnknownType(s.to_string()))
    }
}

/// Everything the pipeline needs to process one record type
#[derive(Debug)]
pub struct TypeDescriptor {
    pub record_type: RecordType,
    pub schema: &'static Schema,
    key_index: usize,
    pub staging_table: &'static str,
    pub table: &'static str,
}

impl TypeDescriptor {
    /// Field holding the external identifier (primary key of `table`)
    pub fn key_field(&self) -> &'static FieldSpec {
        &self.schema.fields[self.key_index]
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    /// Columns a CSV header may name: schema fields plus the deletion flag
    pub fn staging_columns(&self) -> Vec<String> {
        let mut columns = self.schema.columns();
        columns.push(DELETION_FLAG.to_ascii_lowercase());
        columns
    }
}
