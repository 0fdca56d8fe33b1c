//! Declaration value model exchanged with the parser collaborator.

use bitflags::bitflags;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, StorageError};

use super::ids::{
    EnumerationDeclarationId, FunctionDeclarationId, PropertyDeclarationId, SignalDeclarationId,
    SourceId, TypeId,
};

/// How a type behaves on assignment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessSemantics {
    /// Not known yet, e.g. a type only referenced by name so far.
    #[default]
    Invalid,
    Reference,
    Value,
    Sequence,
    IsEnum,
}

impl AccessSemantics {
    pub fn to_i64(self) -> Option<i64> {
        match self {
            AccessSemantics::Invalid => None,
            AccessSemantics::Reference => Some(1),
            AccessSemantics::Value => Some(2),
            AccessSemantics::Sequence => Some(3),
            AccessSemantics::IsEnum => Some(1 << 8),
        }
    }

    pub fn from_i64(value: Option<i64>) -> Result<Self> {
        match value {
            None | Some(0) => Ok(AccessSemantics::Invalid),
            Some(1) => Ok(AccessSemantics::Reference),
            Some(2) => Ok(AccessSemantics::Value),
            Some(3) => Ok(AccessSemantics::Sequence),
            Some(256) => Ok(AccessSemantics::IsEnum),
            Some(other) => Err(StorageError::UnknownAccessSemantics(other)),
        }
    }
}

impl ToSql for AccessSemantics {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self.to_i64() {
            Some(value) => Ok(ToSqlOutput::from(value)),
            None => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

impl FromSql for AccessSemantics {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = Option::<i64>::column_result(value)?;
        AccessSemantics::from_i64(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

bitflags! {
    /// Flags on properties and parameters.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DeclarationTraits: u32 {
        const READ_ONLY = 1 << 0;
        const POINTER = 1 << 1;
        const LIST = 1 << 2;
    }
}

impl ToSql for DeclarationTraits {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl FromSql for DeclarationTraits {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bits = Option::<i64>::column_result(value)?.unwrap_or(0);
        u32::try_from(bits)
            .map(DeclarationTraits::from_bits_truncate)
            .map_err(|_| FromSqlError::OutOfRange(bits))
    }
}

/// One component of a version; negative means "not specified".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionNumber(pub i64);

impl VersionNumber {
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        VersionNumber(-1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub major: VersionNumber,
    #[serde(default)]
    pub minor: VersionNumber,
}

impl Version {
    pub fn new(major: i64, minor: i64) -> Self {
        Self {
            major: VersionNumber(major),
            minor: VersionNumber(minor),
        }
    }

    pub fn major(major: i64) -> Self {
        Self {
            major: VersionNumber(major),
            minor: VersionNumber::default(),
        }
    }

    pub fn is_valid(self) -> bool {
        self.major.is_valid() && self.minor.is_valid()
    }
}

/// A qualified, versioned name a type can be imported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedType {
    pub qualified_type_name: String,
    #[serde(default)]
    pub version: Version,
}

impl ExportedType {
    pub fn new(qualified_type_name: impl Into<String>, version: Version) -> Self {
        Self {
            qualified_type_name: qualified_type_name.into(),
            version,
        }
    }

    pub fn unversioned(qualified_type_name: impl Into<String>) -> Self {
        Self::new(qualified_type_name, Version::default())
    }
}

pub type ExportedTypes = Vec<ExportedType>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratorDeclaration {
    pub name: String,
    #[serde(default)]
    pub value: Option<i64>,
}

impl EnumeratorDeclaration {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }

    pub fn without_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

pub type EnumeratorDeclarations = Vec<EnumeratorDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationDeclaration {
    pub name: String,
    #[serde(default)]
    pub enumerator_declarations: EnumeratorDeclarations,
}

impl EnumerationDeclaration {
    pub fn new(name: impl Into<String>, enumerator_declarations: EnumeratorDeclarations) -> Self {
        Self {
            name: name.into(),
            enumerator_declarations,
        }
    }
}

pub type EnumerationDeclarations = Vec<EnumerationDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub traits: DeclarationTraits,
}

impl ParameterDeclaration {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::with_traits(name, type_name, DeclarationTraits::empty())
    }

    pub fn with_traits(
        name: impl Into<String>,
        type_name: impl Into<String>,
        traits: DeclarationTraits,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            traits,
        }
    }
}

pub type ParameterDeclarations = Vec<ParameterDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDeclaration {
    pub name: String,
    #[serde(default)]
    pub parameters: ParameterDeclarations,
}

impl SignalDeclaration {
    pub fn new(name: impl Into<String>, parameters: ParameterDeclarations) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

pub type SignalDeclarations = Vec<SignalDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub return_type_name: String,
    #[serde(default)]
    pub parameters: ParameterDeclarations,
}

impl FunctionDeclaration {
    pub fn new(
        name: impl Into<String>,
        return_type_name: impl Into<String>,
        parameters: ParameterDeclarations,
    ) -> Self {
        Self {
            name: name.into(),
            return_type_name: return_type_name.into(),
            parameters,
        }
    }
}

pub type FunctionDeclarations = Vec<FunctionDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub traits: DeclarationTraits,
}

impl PropertyDeclaration {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        traits: DeclarationTraits,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            traits,
        }
    }
}

pub type PropertyDeclarations = Vec<PropertyDeclaration>;

/// A component type with everything declared on it.
///
/// `prototype` is the name of the base type; an empty name means the type is
/// a root. `type_id` is filled in by the store when a type is fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Type {
    pub type_name: String,
    pub prototype: String,
    pub access_semantics: AccessSemantics,
    pub source_id: SourceId,
    pub exported_types: ExportedTypes,
    pub property_declarations: PropertyDeclarations,
    pub function_declarations: FunctionDeclarations,
    pub signal_declarations: SignalDeclarations,
    pub enumeration_declarations: EnumerationDeclarations,
    pub type_id: TypeId,
}

impl Type {
    pub fn new(
        type_name: impl Into<String>,
        prototype: impl Into<String>,
        access_semantics: AccessSemantics,
        source_id: SourceId,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            prototype: prototype.into(),
            access_semantics,
            source_id,
            ..Self::default()
        }
    }

    pub fn with_exported_types(mut self, exported_types: ExportedTypes) -> Self {
        self.exported_types = exported_types;
        self
    }

    pub fn with_property_declarations(mut self, declarations: PropertyDeclarations) -> Self {
        self.property_declarations = declarations;
        self
    }

    pub fn with_function_declarations(mut self, declarations: FunctionDeclarations) -> Self {
        self.function_declarations = declarations;
        self
    }

    pub fn with_signal_declarations(mut self, declarations: SignalDeclarations) -> Self {
        self.signal_declarations = declarations;
        self
    }

    pub fn with_enumeration_declarations(mut self, declarations: EnumerationDeclarations) -> Self {
        self.enumeration_declarations = declarations;
        self
    }
}

pub type Types = Vec<Type>;

/// Persisted rows as seen by the sorted merge.
#[derive(Debug, Clone)]
pub(crate) struct PropertyDeclarationView {
    pub name: String,
    pub traits: DeclarationTraits,
    pub type_id: TypeId,
    pub id: PropertyDeclarationId,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionDeclarationView {
    pub name: String,
    pub return_type_name: String,
    pub signature: String,
    pub id: FunctionDeclarationId,
}

#[derive(Debug, Clone)]
pub(crate) struct SignalDeclarationView {
    pub name: String,
    pub signature: String,
    pub id: SignalDeclarationId,
}

#[derive(Debug, Clone)]
pub(crate) struct EnumerationDeclarationView {
    pub name: String,
    pub enumerator_declarations: String,
    pub id: EnumerationDeclarationId,
}

#[derive(Serialize)]
struct EncodedParameter<'a> {
    #[serde(rename = "n")]
    name: &'a str,
    #[serde(rename = "tn")]
    type_name: &'a str,
    #[serde(rename = "tr", skip_serializing_if = "Option::is_none")]
    traits: Option<u32>,
}

/// Canonical JSON for a parameter list: `[{"n":..,"tn":..,"tr":..}]`, with
/// `tr` left out when no trait is set.
pub fn encode_parameters(parameters: &[ParameterDeclaration]) -> Result<String> {
    let encoded: Vec<EncodedParameter<'_>> = parameters
        .iter()
        .map(|parameter| EncodedParameter {
            name: &parameter.name,
            type_name: &parameter.type_name,
            traits: (!parameter.traits.is_empty()).then(|| parameter.traits.bits()),
        })
        .collect();

    Ok(serde_json::to_string(&encoded)?)
}

struct EncodedEnumerators<'a>(&'a [EnumeratorDeclaration]);

impl Serialize for EncodedEnumerators<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for enumerator in self.0 {
            map.serialize_entry(&enumerator.name, &enumerator.value)?;
        }
        map.end()
    }
}

/// Canonical JSON for enumerators: an object in declaration order mapping
/// each name to its value or `null`.
pub fn encode_enumerators(enumerators: &[EnumeratorDeclaration]) -> Result<String> {
    Ok(serde_json::to_string(&EncodedEnumerators(enumerators))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_semantics_round_trip() {
        for semantics in [
            AccessSemantics::Reference,
            AccessSemantics::Value,
            AccessSemantics::Sequence,
            AccessSemantics::IsEnum,
        ] {
            assert_eq!(AccessSemantics::from_i64(semantics.to_i64()).unwrap(), semantics);
        }

        assert_eq!(AccessSemantics::Invalid.to_i64(), None);
        assert!(AccessSemantics::from_i64(Some(77)).is_err());
    }

    #[test]
    fn test_encode_parameters() {
        let parameters = vec![
            ParameterDeclaration::new("x", "int"),
            ParameterDeclaration::with_traits(
                "items",
                "Item",
                DeclarationTraits::POINTER | DeclarationTraits::LIST,
            ),
        ];

        insta::assert_snapshot!(
            encode_parameters(&parameters).unwrap(),
            @r#"[{"n":"x","tn":"int"},{"n":"items","tn":"Item","tr":6}]"#
        );
        insta::assert_snapshot!(encode_parameters(&[]).unwrap(), @"[]");
    }

    #[test]
    fn test_encode_enumerators_keeps_declaration_order() {
        let enumerators = vec![
            EnumeratorDeclaration::new("Zoo", 4),
            EnumeratorDeclaration::without_value("Alpha"),
        ];

        insta::assert_snapshot!(
            encode_enumerators(&enumerators).unwrap(),
            @r#"{"Zoo":4,"Alpha":null}"#
        );
    }

    #[test]
    fn test_encoding_escapes_names() {
        let parameters = vec![ParameterDeclaration::new("a\"b", "int")];

        let encoded = encode_parameters(&parameters).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded[0]["n"], "a\"b");
    }

    #[test]
    fn test_type_deserializes_with_defaults() {
        let ty: Type = serde_json::from_str(
            r#"{"type_name": "Item", "prototype": "QObject", "access_semantics": "reference",
                "property_declarations": [{"name": "x", "type_name": "double"}]}"#,
        )
        .unwrap();

        assert_eq!(ty.type_name, "Item");
        assert_eq!(ty.access_semantics, AccessSemantics::Reference);
        assert!(!ty.source_id.is_valid());
        assert_eq!(ty.property_declarations[0].traits, DeclarationTraits::empty());
    }
}
