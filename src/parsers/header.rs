// ==============================================================================
// parsers/header.rs - VCF header summary
// ==============================================================================
// Description: Maps the noodles-parsed VCF header onto declared INFO/FORMAT
//              field definitions and sample names
// Author: Matt Barham
// Created: 2026-09-24
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================
// Number mapping:
//   Count(n) -> Fixed(n)   A -> PerAlternate   G -> PerGenotype
//   R, ., local and ploidy counts -> Variable
// Character is typed as String.
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::header::record::value::map::format::{Number as FormatNumber, Type as FormatType};
use noodles_vcf::header::record::value::map::info::{Number as InfoNumber, Type as InfoType};

use crate::schema::{Cardinality, DeclaredField, FieldCategory, FieldType};

/// What the header of one source declares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    pub declared_fields: Vec<DeclaredField>,
    pub sample_names: Vec<String>,
}

impl HeaderSummary {
    /// Summarize a parsed header, INFO declarations first, in header order
    pub fn from_header(header: &vcf::Header) -> Self {
        let infos = header.infos().iter().map(|(id, info)| DeclaredField {
            name: id.to_string(),
            category: FieldCategory::Info,
            field_type: info_type(info.ty()),
            cardinality: info_cardinality(info.number()),
            description: non_empty(info.description()),
        });

        let formats = header.formats().iter().map(|(id, format)| DeclaredField {
            name: id.to_string(),
            category: FieldCategory::Format,
            field_type: format_type(format.ty()),
            cardinality: format_cardinality(format.number()),
            description: non_empty(format.description()),
        });

        Self {
            declared_fields: infos.chain(formats).collect(),
            sample_names: header
                .sample_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

fn non_empty(description: &str) -> Option<String> {
    (!description.is_empty()).then(|| description.to_string())
}

fn info_type(ty: InfoType) -> FieldType {
    match ty {
        InfoType::Flag => FieldType::Flag,
        InfoType::Integer => FieldType::Integer,
        InfoType::Float => FieldType::Float,
        InfoType::Character | InfoType::String => FieldType::String,
    }
}

fn format_type(ty: FormatType) -> FieldType {
    match ty {
        FormatType::Integer => FieldType::Integer,
        FormatType::Float => FieldType::Float,
        FormatType::Character | FormatType::String => FieldType::String,
    }
}

fn info_cardinality(number: InfoNumber) -> Cardinality {
    match number {
        InfoNumber::Count(n) => Cardinality::Fixed(n),
        InfoNumber::AlternateBases => Cardinality::PerAlternate,
        InfoNumber::Samples => Cardinality::PerGenotype,
        InfoNumber::ReferenceAlternateBases | InfoNumber::Unknown => Cardinality::Variable,
    }
}

fn format_cardinality(number: FormatNumber) -> Cardinality {
    match number {
        FormatNumber::Count(n) => Cardinality::Fixed(n),
        FormatNumber::AlternateBases => Cardinality::PerAlternate,
        FormatNumber::Samples => Cardinality::PerGenotype,
        FormatNumber::ReferenceAlternateBases
        | FormatNumber::LocalAlternateBases
        | FormatNumber::LocalReferenceAlternateBases
        | FormatNumber::LocalSamples
        | FormatNumber::Ploidy
        | FormatNumber::BaseModifications
        | FormatNumber::Unknown => Cardinality::Variable,
    }
}
