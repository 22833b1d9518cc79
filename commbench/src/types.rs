use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Rank of a participant in a process group (0-indexed).
pub type Rank = u32;

/// Identifier of a process group known to a backend.
pub type GroupId = u32;

/// Element types a benchmark can stage and validate.
///
/// Covers the dtype names accepted on the command line. `Bool` is stored as
/// one byte per element holding 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    Bool = 7,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::F16 | DataType::BF16 => 2,
            DataType::U8 | DataType::Bool => 1,
        }
    }

    /// Canonical name, matching the long-form command-line spelling.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "float32",
            DataType::F64 => "float64",
            DataType::F16 => "float16",
            DataType::BF16 => "bfloat16",
            DataType::I32 => "int32",
            DataType::I64 => "long",
            DataType::U8 => "byte",
            DataType::Bool => "bool",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(
            self,
            DataType::F32 | DataType::F64 | DataType::F16 | DataType::BF16
        )
    }

    /// Every accepted spelling, in the order shown in help text.
    pub const ACCEPTED_NAMES: &'static [&'static str] = &[
        "float32", "int32", "long", "float16", "bfloat16", "float64", "bool", "Float", "Int",
        "Long", "Double", "Half", "Bool", "Byte",
    ];
}

impl FromStr for DataType {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s {
            "float32" | "Float" => DataType::F32,
            "int32" | "Int" => DataType::I32,
            "long" | "Long" => DataType::I64,
            "float16" | "Half" => DataType::F16,
            "bfloat16" => DataType::BF16,
            "float64" | "Double" => DataType::F64,
            "bool" | "Bool" => DataType::Bool,
            "Byte" | "byte" => DataType::U8,
            other => return Err(BenchError::UnknownDType(other.to_string())),
        };
        Ok(dtype)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction applied by reducing collectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceOp {
    /// Element-wise sum across ranks.
    #[default]
    Sum,
    /// Element-wise product across ranks.
    Prod,
    /// Element-wise minimum across ranks.
    Min,
    /// Element-wise maximum across ranks.
    Max,
}

impl FromStr for ReduceOp {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(ReduceOp::Sum),
            "prod" | "product" => Ok(ReduceOp::Prod),
            "min" => Ok(ReduceOp::Min),
            "max" => Ok(ReduceOp::Max),
            other => Err(BenchError::config(format!("unknown reduce op: {other}"))),
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Opaque handle to a device execution stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_sizes() {
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F64.size_in_bytes(), 8);
        assert_eq!(DataType::F16.size_in_bytes(), 2);
        assert_eq!(DataType::BF16.size_in_bytes(), 2);
        assert_eq!(DataType::I32.size_in_bytes(), 4);
        assert_eq!(DataType::I64.size_in_bytes(), 8);
        assert_eq!(DataType::U8.size_in_bytes(), 1);
        assert_eq!(DataType::Bool.size_in_bytes(), 1);
    }

    #[test]
    fn test_every_accepted_name_parses() {
        for name in DataType::ACCEPTED_NAMES {
            assert!(name.parse::<DataType>().is_ok(), "{name} should parse");
        }
    }

    #[test]
    fn test_dtype_aliases() {
        assert_eq!("Half".parse::<DataType>().unwrap(), DataType::F16);
        assert_eq!("Long".parse::<DataType>().unwrap(), DataType::I64);
        assert_eq!("Double".parse::<DataType>().unwrap(), DataType::F64);
        assert_eq!("Byte".parse::<DataType>().unwrap(), DataType::U8);
        assert!("complex64".parse::<DataType>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let all = [
            DataType::F32,
            DataType::F64,
            DataType::F16,
            DataType::BF16,
            DataType::I32,
            DataType::I64,
            DataType::U8,
            DataType::Bool,
        ];
        for dt in all {
            assert_eq!(dt.to_string().parse::<DataType>().unwrap(), dt);
        }
    }

    #[test]
    fn test_reduce_op_parse_and_display() {
        assert_eq!("SUM".parse::<ReduceOp>().unwrap(), ReduceOp::Sum);
        assert_eq!("max".parse::<ReduceOp>().unwrap(), ReduceOp::Max);
        assert!("avg".parse::<ReduceOp>().is_err());
        assert_eq!(ReduceOp::Prod.to_string(), "prod");
        assert_eq!(ReduceOp::default(), ReduceOp::Sum);
    }

    #[test]
    fn test_float_classification() {
        assert!(DataType::BF16.is_float());
        assert!(!DataType::Bool.is_float());
        assert!(!DataType::I64.is_float());
    }
}
