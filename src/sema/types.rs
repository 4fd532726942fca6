//! Type interner for efficient type storage and comparison.
//!
//! All GLSL types are interned: equal types always have the same `Ty`
//! handle, so type equality is a `u32` compare. Struct and interface block
//! bodies live in a side table keyed by [`StructId`].

use crate::ids::StructId;
use crate::index_vec::IndexVec;
use crate::source::Span;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// An interned type reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Ty(pub u32);

impl Ty {
    /// The error type (for recovery).
    pub const ERROR: Ty = Ty(0);
    pub const VOID: Ty = Ty(1);
    pub const BOOL: Ty = Ty(2);
    pub const INT: Ty = Ty(3);
    pub const UINT: Ty = Ty(4);
    pub const FLOAT: Ty = Ty(5);
    pub const DOUBLE: Ty = Ty(6);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ty({})", self.0)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ty#{}", self.0)
    }
}

/// Dimensionality of an image type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum ImageDim {
    D1,
    D2,
    D3,
    Cube,
}

/// Canonical image type description (the sampled half of a combined
/// image-sampler).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct ImageType {
    /// Scalar result type of a sampling operation.
    pub sampled: Ty,
    pub dim: ImageDim,
    pub depth: bool,
    pub arrayed: bool,
    pub ms: bool,
}

/// Canonical type representation for interning. Compound types hold `Ty`
/// handles, enabling structural sharing.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum TyKind {
    Error,
    Void,
    Bool,
    Int,
    Uint,
    Float,
    Double,
    Vector { elem: Ty, size: u8 },
    Matrix { cols: u8, rows: u8, elem: Ty },
    Array { elem: Ty, size: Option<u32> },
    Struct(StructId),
    Image(ImageType),
    /// Combined image-sampler (`sampler2D` and friends).
    SampledImage(Ty),
    Sampler,
}

/// A struct or interface block member.
#[derive(Debug, Clone, Serialize)]
pub struct StructMember {
    pub name: String,
    pub ty: Ty,
    pub span: Span,
}

/// A struct or interface block definition.
#[derive(Debug, Clone, Serialize)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<StructMember>,
    /// Interface blocks get a Block decoration and explicit member offsets.
    pub is_block: bool,
}

impl StructDef {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// Type interner plus the struct definition table.
#[derive(Debug)]
pub struct Types {
    cache: HashMap<TyKind, Ty>,
    kinds: Vec<TyKind>,
    structs: IndexVec<StructId, StructDef>,
}

impl Default for Types {
    fn default() -> Self {
        Self::new()
    }
}

impl Types {
    /// Create a new type table with pre-interned common types.
    pub fn new() -> Self {
        let mut types = Self {
            cache: HashMap::new(),
            kinds: Vec::new(),
            structs: IndexVec::new(),
        };

        // Pre-intern common types at known indices.
        // These MUST match the Ty::* constants.
        assert_eq!(types.intern(TyKind::Error), Ty::ERROR);
        assert_eq!(types.intern(TyKind::Void), Ty::VOID);
        assert_eq!(types.intern(TyKind::Bool), Ty::BOOL);
        assert_eq!(types.intern(TyKind::Int), Ty::INT);
        assert_eq!(types.intern(TyKind::Uint), Ty::UINT);
        assert_eq!(types.intern(TyKind::Float), Ty::FLOAT);
        assert_eq!(types.intern(TyKind::Double), Ty::DOUBLE);

        types
    }

    /// Intern a type, returning its handle.
    pub fn intern(&mut self, kind: TyKind) -> Ty {
        if let Some(&ty) = self.cache.get(&kind) {
            return ty;
        }
        let ty = Ty(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.cache.insert(kind, ty);
        ty
    }

    /// Get the kind of an interned type.
    pub fn kind(&self, ty: Ty) -> &TyKind {
        &self.kinds[ty.index()]
    }

    pub fn vector(&mut self, elem: Ty, size: u8) -> Ty {
        debug_assert!((2..=4).contains(&size));
        self.intern(TyKind::Vector { elem, size })
    }

    pub fn matrix(&mut self, cols: u8, rows: u8, elem: Ty) -> Ty {
        self.intern(TyKind::Matrix { cols, rows, elem })
    }

    pub fn array(&mut self, elem: Ty, size: Option<u32>) -> Ty {
        self.intern(TyKind::Array { elem, size })
    }

    pub fn sampled_image(&mut self, image: ImageType) -> Ty {
        let img = self.intern(TyKind::Image(image));
        self.intern(TyKind::SampledImage(img))
    }

    /// Register a struct definition and return its interned type.
    pub fn declare_struct(&mut self, def: StructDef) -> Ty {
        let id = self.structs.push(def);
        self.intern(TyKind::Struct(id))
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id]
    }

    pub fn struct_defs(&self) -> impl Iterator<Item = (StructId, &StructDef)> {
        self.structs.iter_enumerated()
    }

    /// Resolve a builtin type name (`vec3`, `mat4x2`, `sampler2D`, ...).
    pub fn from_name(&mut self, name: &str) -> Option<Ty> {
        match name {
            "void" => return Some(Ty::VOID),
            "bool" => return Some(Ty::BOOL),
            "int" => return Some(Ty::INT),
            "uint" => return Some(Ty::UINT),
            "float" => return Some(Ty::FLOAT),
            "double" => return Some(Ty::DOUBLE),
            _ => {}
        }

        // vecN / bvecN / ivecN / uvecN / dvecN
        if let Some(rest) = name.strip_suffix(|c: char| c.is_ascii_digit()) {
            let size = name.as_bytes()[name.len() - 1] - b'0';
            if (2..=4).contains(&size) {
                let elem = match rest {
                    "vec" => Some(Ty::FLOAT),
                    "bvec" => Some(Ty::BOOL),
                    "ivec" => Some(Ty::INT),
                    "uvec" => Some(Ty::UINT),
                    "dvec" => Some(Ty::DOUBLE),
                    _ => None,
                };
                if let Some(elem) = elem {
                    return Some(self.vector(elem, size));
                }
            }
        }

        // matN, matCxR, dmatN, dmatCxR
        let (mat_rest, mat_elem) = if let Some(r) = name.strip_prefix("dmat") {
            (Some(r), Ty::DOUBLE)
        } else if let Some(r) = name.strip_prefix("mat") {
            (Some(r), Ty::FLOAT)
        } else {
            (None, Ty::FLOAT)
        };
        if let Some(dims) = mat_rest {
            let bytes = dims.as_bytes();
            match bytes {
                [n] if (b'2'..=b'4').contains(n) => {
                    let n = n - b'0';
                    return Some(self.matrix(n, n, mat_elem));
                }
                [c, b'x', r] if (b'2'..=b'4').contains(c) && (b'2'..=b'4').contains(r) => {
                    return Some(self.matrix(c - b'0', r - b'0', mat_elem));
                }
                _ => return None,
            }
        }

        if name == "sampler" {
            return Some(self.intern(TyKind::Sampler));
        }
        self.sampler_from_name(name)
    }

    fn sampler_from_name(&mut self, name: &str) -> Option<Ty> {
        let (sampled, rest) = if let Some(r) = name.strip_prefix("isampler") {
            (Ty::INT, r)
        } else if let Some(r) = name.strip_prefix("usampler") {
            (Ty::UINT, r)
        } else if let Some(r) = name.strip_prefix("sampler") {
            (Ty::FLOAT, r)
        } else {
            return None;
        };

        let (dim, rest) = if let Some(r) = rest.strip_prefix("1D") {
            (ImageDim::D1, r)
        } else if let Some(r) = rest.strip_prefix("2DMS") {
            return self.finish_sampler(sampled, ImageDim::D2, r, true);
        } else if let Some(r) = rest.strip_prefix("2D") {
            (ImageDim::D2, r)
        } else if let Some(r) = rest.strip_prefix("3D") {
            (ImageDim::D3, r)
        } else if let Some(r) = rest.strip_prefix("Cube") {
            (ImageDim::Cube, r)
        } else {
            return None;
        };
        self.finish_sampler(sampled, dim, rest, false)
    }

    fn finish_sampler(&mut self, sampled: Ty, dim: ImageDim, rest: &str, ms: bool) -> Option<Ty> {
        let (arrayed, rest) = match rest.strip_prefix("Array") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let (depth, rest) = match rest.strip_prefix("Shadow") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        if !rest.is_empty() || (depth && sampled != Ty::FLOAT) {
            return None;
        }
        Some(self.sampled_image(ImageType {
            sampled,
            dim,
            depth,
            arrayed,
            ms,
        }))
    }

    /// Human-readable name for diagnostics.
    pub fn name(&self, ty: Ty) -> String {
        match self.kind(ty) {
            TyKind::Error => "<error>".to_string(),
            TyKind::Void => "void".to_string(),
            TyKind::Bool => "bool".to_string(),
            TyKind::Int => "int".to_string(),
            TyKind::Uint => "uint".to_string(),
            TyKind::Float => "float".to_string(),
            TyKind::Double => "double".to_string(),
            TyKind::Vector { elem, size } => {
                let prefix = match *elem {
                    Ty::BOOL => "bvec",
                    Ty::INT => "ivec",
                    Ty::UINT => "uvec",
                    Ty::DOUBLE => "dvec",
                    _ => "vec",
                };
                format!("{}{}", prefix, size)
            }
            TyKind::Matrix { cols, rows, elem } => {
                let prefix = if *elem == Ty::DOUBLE { "dmat" } else { "mat" };
                if cols == rows {
                    format!("{}{}", prefix, cols)
                } else {
                    format!("{}{}x{}", prefix, cols, rows)
                }
            }
            TyKind::Array { elem, size } => match size {
                Some(n) => format!("{}[{}]", self.name(*elem), n),
                None => format!("{}[]", self.name(*elem)),
            },
            TyKind::Struct(id) => self.structs[*id].name.clone(),
            TyKind::Image(_) => "image".to_string(),
            TyKind::SampledImage(img) => {
                let TyKind::Image(image) = self.kind(*img) else {
                    return "sampler".to_string();
                };
                let prefix = match image.sampled {
                    Ty::INT => "isampler",
                    Ty::UINT => "usampler",
                    _ => "sampler",
                };
                let dim = match image.dim {
                    ImageDim::D1 => "1D",
                    ImageDim::D2 => "2D",
                    ImageDim::D3 => "3D",
                    ImageDim::Cube => "Cube",
                };
                format!(
                    "{}{}{}{}{}",
                    prefix,
                    dim,
                    if image.ms { "MS" } else { "" },
                    if image.arrayed { "Array" } else { "" },
                    if image.depth { "Shadow" } else { "" },
                )
            }
            TyKind::Sampler => "sampler".to_string(),
        }
    }

    // ---- classification ---------------------------------------------------

    pub fn is_scalar(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TyKind::Bool | TyKind::Int | TyKind::Uint | TyKind::Float | TyKind::Double
        )
    }

    pub fn is_integer_scalar(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TyKind::Int | TyKind::Uint)
    }

    pub fn is_floating_scalar(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TyKind::Float | TyKind::Double)
    }

    pub fn is_opaque(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TyKind::Image(_) | TyKind::SampledImage(_) | TyKind::Sampler
        )
    }

    /// Scalar element type of a scalar, vector, or matrix; `None` otherwise.
    pub fn scalar_base(&self, ty: Ty) -> Option<Ty> {
        match self.kind(ty) {
            TyKind::Bool | TyKind::Int | TyKind::Uint | TyKind::Float | TyKind::Double => Some(ty),
            TyKind::Vector { elem, .. } | TyKind::Matrix { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    pub fn vector_size(&self, ty: Ty) -> Option<u8> {
        match self.kind(ty) {
            TyKind::Vector { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// Column type of a matrix.
    pub fn column_type(&mut self, ty: Ty) -> Option<Ty> {
        match *self.kind(ty) {
            TyKind::Matrix { rows, elem, .. } => Some(self.vector(elem, rows)),
            _ => None,
        }
    }

    /// Total scalar component count of a scalar/vector/matrix type.
    pub fn component_count(&self, ty: Ty) -> Option<u32> {
        match self.kind(ty) {
            TyKind::Bool | TyKind::Int | TyKind::Uint | TyKind::Float | TyKind::Double => Some(1),
            TyKind::Vector { size, .. } => Some(*size as u32),
            TyKind::Matrix { cols, rows, .. } => Some(*cols as u32 * *rows as u32),
            _ => None,
        }
    }

    // ---- implicit conversions ---------------------------------------------

    /// Scalar conversion rank: int < uint < float < double. Bool never
    /// converts implicitly.
    fn scalar_rank(&self, ty: Ty) -> Option<u8> {
        match self.kind(ty) {
            TyKind::Int => Some(0),
            TyKind::Uint => Some(1),
            TyKind::Float => Some(2),
            TyKind::Double => Some(3),
            _ => None,
        }
    }

    /// Whether `from` implicitly converts to `to` (identity included).
    pub fn implicitly_converts(&self, from: Ty, to: Ty) -> bool {
        if from == to {
            return true;
        }
        match (self.kind(from), self.kind(to)) {
            (
                TyKind::Vector { elem: fe, size: fs },
                TyKind::Vector { elem: te, size: ts },
            ) => fs == ts && self.implicitly_converts(*fe, *te),
            (
                TyKind::Matrix {
                    cols: fc,
                    rows: fr,
                    elem: fe,
                },
                TyKind::Matrix {
                    cols: tc,
                    rows: tr,
                    elem: te,
                },
            ) => fc == tc && fr == tr && self.implicitly_converts(*fe, *te),
            _ => match (self.scalar_rank(from), self.scalar_rank(to)) {
                (Some(f), Some(t)) => f < t,
                _ => false,
            },
        }
    }

    /// Common type of two operands under implicit conversion, if any.
    pub fn common_type(&self, a: Ty, b: Ty) -> Option<Ty> {
        if self.implicitly_converts(a, b) {
            Some(b)
        } else if self.implicitly_converts(b, a) {
            Some(a)
        } else {
            None
        }
    }

    /// Rebuild `ty` with a different scalar element (used to promote
    /// vectors and matrices during conversion).
    pub fn with_scalar(&mut self, ty: Ty, scalar: Ty) -> Ty {
        match *self.kind(ty) {
            TyKind::Vector { size, .. } => self.vector(scalar, size),
            TyKind::Matrix { cols, rows, .. } => self.matrix(cols, rows, scalar),
            _ => scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_interning_deduplication() {
        let mut types = Types::new();
        let v1 = types.vector(Ty::FLOAT, 3);
        let v2 = types.vector(Ty::FLOAT, 3);
        let v3 = types.vector(Ty::FLOAT, 4);
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_builtin_names() {
        let mut types = Types::new();
        assert_eq!(types.from_name("float"), Some(Ty::FLOAT));
        let vec3 = types.from_name("vec3").unwrap();
        assert_eq!(types.name(vec3), "vec3");
        let ivec2 = types.from_name("ivec2").unwrap();
        assert!(matches!(
            types.kind(ivec2),
            TyKind::Vector {
                elem: Ty::INT,
                size: 2
            }
        ));
        let m = types.from_name("mat3x2").unwrap();
        assert!(matches!(
            types.kind(m),
            TyKind::Matrix {
                cols: 3,
                rows: 2,
                ..
            }
        ));
        assert_eq!(types.from_name("vec5"), None);
        assert_eq!(types.from_name("notatype"), None);
    }

    #[test]
    fn test_sampler_names() {
        let mut types = Types::new();
        let s = types.from_name("sampler2D").unwrap();
        assert_eq!(types.name(s), "sampler2D");
        let shadow = types.from_name("sampler2DShadow").unwrap();
        assert_eq!(types.name(shadow), "sampler2DShadow");
        let usamp = types.from_name("usamplerCube").unwrap();
        assert_eq!(types.name(usamp), "usamplerCube");
        assert!(types.is_opaque(s));
        // No integer shadow samplers.
        assert_eq!(types.from_name("isampler2DShadow"), None);
    }

    #[test]
    fn test_implicit_conversions() {
        let mut types = Types::new();
        assert!(types.implicitly_converts(Ty::INT, Ty::FLOAT));
        assert!(types.implicitly_converts(Ty::UINT, Ty::DOUBLE));
        assert!(!types.implicitly_converts(Ty::FLOAT, Ty::INT));
        assert!(!types.implicitly_converts(Ty::BOOL, Ty::INT));

        let ivec3 = types.from_name("ivec3").unwrap();
        let vec3 = types.from_name("vec3").unwrap();
        let vec2 = types.from_name("vec2").unwrap();
        assert!(types.implicitly_converts(ivec3, vec3));
        assert!(!types.implicitly_converts(ivec3, vec2));
        assert_eq!(types.common_type(Ty::INT, Ty::FLOAT), Some(Ty::FLOAT));
        assert_eq!(types.common_type(vec3, ivec3), Some(vec3));
        assert_eq!(types.common_type(Ty::BOOL, Ty::FLOAT), None);
    }

    #[test]
    fn test_struct_members() {
        let mut types = Types::new();
        let vec3 = types.vector(Ty::FLOAT, 3);
        let ty = types.declare_struct(StructDef {
            name: "Light".to_string(),
            members: vec![
                StructMember {
                    name: "pos".to_string(),
                    ty: vec3,
                    span: Span::default(),
                },
                StructMember {
                    name: "intensity".to_string(),
                    ty: Ty::FLOAT,
                    span: Span::default(),
                },
            ],
            is_block: false,
        });
        let TyKind::Struct(id) = *types.kind(ty) else {
            panic!("expected struct");
        };
        assert_eq!(types.struct_def(id).member_index("intensity"), Some(1));
        assert_eq!(types.struct_def(id).member_index("missing"), None);
        assert_eq!(types.name(ty), "Light");
    }

    #[test]
    fn test_component_counts() {
        let mut types = Types::new();
        let vec4 = types.vector(Ty::FLOAT, 4);
        let mat4 = types.matrix(4, 4, Ty::FLOAT);
        assert_eq!(types.component_count(Ty::FLOAT), Some(1));
        assert_eq!(types.component_count(vec4), Some(4));
        assert_eq!(types.component_count(mat4), Some(16));
        let arr = types.array(Ty::FLOAT, Some(3));
        assert_eq!(types.component_count(arr), None);
    }
}
