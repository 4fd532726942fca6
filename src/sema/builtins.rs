//! Builtin function registry and overload selection.
//!
//! GLSL builtins are generic over scalar kind and vector width, so the
//! registry enumerates concrete signatures up front (float scalars plus
//! vec2..vec4, integer variants where the language defines them). Lookup
//! and overload selection then work the same way as for user functions.

use crate::sema::types::{ImageDim, ImageType, Ty, Types};
use crate::stage::ShaderStage;
use std::collections::HashMap;

/// The operation a resolved builtin call lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    /// GLSL.std.450 extended instruction.
    Ext(spirv::GLOp),
    Dot,
    OuterProduct,
    Transpose,
    FMod,
    /// Component-wise vector comparisons (`lessThan` and friends). The
    /// concrete opcode depends on the operand scalar type.
    CompareLess,
    CompareLessEqual,
    CompareGreater,
    CompareGreaterEqual,
    CompareEqual,
    CompareNotEqual,
    Any,
    All,
    LogicalNot,
    IsNan,
    IsInf,
    /// `floatBitsToInt` and friends.
    Bitcast,
    DPdx,
    DPdy,
    Fwidth,
    Texture,
    TextureLod,
    TexelFetch,
    TextureSize,
    EmitVertex,
    EndPrimitive,
    Barrier,
    MemoryBarrier,
    MemoryBarrierShared,
    GroupMemoryBarrier,
}

/// One concrete builtin signature.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub op: BuiltinOp,
    /// Stages the builtin is legal in; `None` means any stage.
    pub stages: Option<&'static [ShaderStage]>,
}

const FRAGMENT_ONLY: &[ShaderStage] = &[ShaderStage::Fragment];
const GEOMETRY_ONLY: &[ShaderStage] = &[ShaderStage::Geometry];
const BARRIER_STAGES: &[ShaderStage] = &[ShaderStage::Compute, ShaderStage::TessControl];

/// Outcome of overload selection over a candidate list.
#[derive(Debug, PartialEq)]
pub enum OverloadChoice<T> {
    Unique(T),
    Ambiguous,
    NoMatch,
}

/// Select the best candidate for `args`: a unique exact match wins,
/// otherwise a unique implicitly-convertible match, otherwise ambiguity.
pub fn select_overload<'a, T>(
    types: &Types,
    candidates: impl Iterator<Item = (&'a [Ty], T)>,
    args: &[Ty],
) -> OverloadChoice<T> {
    let mut exact = Vec::new();
    let mut convertible = Vec::new();

    for (params, payload) in candidates {
        if params.len() != args.len() {
            continue;
        }
        if params.iter().zip(args).all(|(p, a)| p == a) {
            exact.push(payload);
        } else if params
            .iter()
            .zip(args)
            .all(|(p, a)| types.implicitly_converts(*a, *p))
        {
            convertible.push(payload);
        }
    }

    match (exact.len(), convertible.len()) {
        (1, _) => OverloadChoice::Unique(exact.into_iter().next().unwrap_or_else(|| unreachable!())),
        (n, _) if n > 1 => OverloadChoice::Ambiguous,
        (0, 1) => OverloadChoice::Unique(
            convertible
                .into_iter()
                .next()
                .unwrap_or_else(|| unreachable!()),
        ),
        (0, 0) => OverloadChoice::NoMatch,
        _ => OverloadChoice::Ambiguous,
    }
}

/// The builtin function table for one compile.
pub struct Builtins {
    map: HashMap<&'static str, Vec<BuiltinSig>>,
}

impl Builtins {
    pub fn get(&self, name: &str) -> Option<&[BuiltinSig]> {
        self.map.get(name).map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn new(types: &mut Types) -> Self {
        let mut b = Builder {
            map: HashMap::new(),
            types,
        };

        use spirv::GLOp;

        // Angle and trigonometry.
        b.gen_f1("radians", BuiltinOp::Ext(GLOp::Radians));
        b.gen_f1("degrees", BuiltinOp::Ext(GLOp::Degrees));
        b.gen_f1("sin", BuiltinOp::Ext(GLOp::Sin));
        b.gen_f1("cos", BuiltinOp::Ext(GLOp::Cos));
        b.gen_f1("tan", BuiltinOp::Ext(GLOp::Tan));
        b.gen_f1("asin", BuiltinOp::Ext(GLOp::Asin));
        b.gen_f1("acos", BuiltinOp::Ext(GLOp::Acos));
        b.gen_f1("atan", BuiltinOp::Ext(GLOp::Atan));
        b.gen_f2("atan", BuiltinOp::Ext(GLOp::Atan2));
        b.gen_f1("sinh", BuiltinOp::Ext(GLOp::Sinh));
        b.gen_f1("cosh", BuiltinOp::Ext(GLOp::Cosh));
        b.gen_f1("tanh", BuiltinOp::Ext(GLOp::Tanh));
        b.gen_f1("asinh", BuiltinOp::Ext(GLOp::Asinh));
        b.gen_f1("acosh", BuiltinOp::Ext(GLOp::Acosh));
        b.gen_f1("atanh", BuiltinOp::Ext(GLOp::Atanh));

        // Exponential.
        b.gen_f2("pow", BuiltinOp::Ext(GLOp::Pow));
        b.gen_f1("exp", BuiltinOp::Ext(GLOp::Exp));
        b.gen_f1("log", BuiltinOp::Ext(GLOp::Log));
        b.gen_f1("exp2", BuiltinOp::Ext(GLOp::Exp2));
        b.gen_f1("log2", BuiltinOp::Ext(GLOp::Log2));
        b.gen_f1("sqrt", BuiltinOp::Ext(GLOp::Sqrt));
        b.gen_f1("inversesqrt", BuiltinOp::Ext(GLOp::InverseSqrt));

        // Common.
        b.gen_f1("abs", BuiltinOp::Ext(GLOp::FAbs));
        b.gen_i1("abs", Ty::INT, BuiltinOp::Ext(GLOp::SAbs));
        b.gen_f1("sign", BuiltinOp::Ext(GLOp::FSign));
        b.gen_i1("sign", Ty::INT, BuiltinOp::Ext(GLOp::SSign));
        b.gen_f1("floor", BuiltinOp::Ext(GLOp::Floor));
        b.gen_f1("trunc", BuiltinOp::Ext(GLOp::Trunc));
        b.gen_f1("round", BuiltinOp::Ext(GLOp::Round));
        b.gen_f1("roundEven", BuiltinOp::Ext(GLOp::RoundEven));
        b.gen_f1("ceil", BuiltinOp::Ext(GLOp::Ceil));
        b.gen_f1("fract", BuiltinOp::Ext(GLOp::Fract));
        b.gen_f2("mod", BuiltinOp::FMod);
        b.gen_f2_mixed("mod", BuiltinOp::FMod);
        b.gen_f2("min", BuiltinOp::Ext(GLOp::FMin));
        b.gen_f2_mixed("min", BuiltinOp::Ext(GLOp::FMin));
        b.gen_i2("min", Ty::INT, BuiltinOp::Ext(GLOp::SMin));
        b.gen_i2("min", Ty::UINT, BuiltinOp::Ext(GLOp::UMin));
        b.gen_f2("max", BuiltinOp::Ext(GLOp::FMax));
        b.gen_f2_mixed("max", BuiltinOp::Ext(GLOp::FMax));
        b.gen_i2("max", Ty::INT, BuiltinOp::Ext(GLOp::SMax));
        b.gen_i2("max", Ty::UINT, BuiltinOp::Ext(GLOp::UMax));
        b.gen_f3("clamp", BuiltinOp::Ext(GLOp::FClamp));
        b.gen_f3_mixed("clamp", BuiltinOp::Ext(GLOp::FClamp));
        b.gen_i3("clamp", Ty::INT, BuiltinOp::Ext(GLOp::SClamp));
        b.gen_i3("clamp", Ty::UINT, BuiltinOp::Ext(GLOp::UClamp));
        b.gen_f3("mix", BuiltinOp::Ext(GLOp::FMix));
        b.gen_f3_mixed("mix", BuiltinOp::Ext(GLOp::FMix));
        b.gen_f2_scalar_first("step", BuiltinOp::Ext(GLOp::Step));
        b.gen_f2("step", BuiltinOp::Ext(GLOp::Step));
        b.gen_f3_scalar_edges("smoothstep", BuiltinOp::Ext(GLOp::SmoothStep));
        b.gen_f3("smoothstep", BuiltinOp::Ext(GLOp::SmoothStep));
        b.gen_f3("fma", BuiltinOp::Ext(GLOp::Fma));
        b.gen_f1_ret("isnan", |t, shape| t.bool_shape(shape), BuiltinOp::IsNan);
        b.gen_f1_ret("isinf", |t, shape| t.bool_shape(shape), BuiltinOp::IsInf);

        // Bit reinterpretation.
        b.bitcasts();

        // Geometric.
        b.gen_f1_ret("length", |_, _| Ty::FLOAT, BuiltinOp::Ext(GLOp::Length));
        b.gen_f2_ret("distance", |_, _| Ty::FLOAT, BuiltinOp::Ext(GLOp::Distance));
        b.gen_f2_ret("dot", |_, _| Ty::FLOAT, BuiltinOp::Dot);
        b.cross();
        b.gen_f1("normalize", BuiltinOp::Ext(GLOp::Normalize));
        b.gen_f3("faceforward", BuiltinOp::Ext(GLOp::FaceForward));
        b.gen_f2("reflect", BuiltinOp::Ext(GLOp::Reflect));
        b.refract();

        // Matrix.
        b.matrix_builtins();

        // Vector relational.
        b.relational("lessThan", BuiltinOp::CompareLess, true);
        b.relational("lessThanEqual", BuiltinOp::CompareLessEqual, true);
        b.relational("greaterThan", BuiltinOp::CompareGreater, true);
        b.relational("greaterThanEqual", BuiltinOp::CompareGreaterEqual, true);
        b.relational("equal", BuiltinOp::CompareEqual, false);
        b.relational("notEqual", BuiltinOp::CompareNotEqual, false);
        b.bool_reductions();

        // Texture lookups.
        b.texture_builtins();

        // Derivatives (fragment stage only).
        b.gen_f1_staged("dFdx", BuiltinOp::DPdx, FRAGMENT_ONLY);
        b.gen_f1_staged("dFdy", BuiltinOp::DPdy, FRAGMENT_ONLY);
        b.gen_f1_staged("fwidth", BuiltinOp::Fwidth, FRAGMENT_ONLY);

        // Geometry stream control.
        b.nullary("EmitVertex", BuiltinOp::EmitVertex, Some(GEOMETRY_ONLY));
        b.nullary("EndPrimitive", BuiltinOp::EndPrimitive, Some(GEOMETRY_ONLY));

        // Synchronization.
        b.nullary("barrier", BuiltinOp::Barrier, Some(BARRIER_STAGES));
        b.nullary("memoryBarrier", BuiltinOp::MemoryBarrier, None);
        b.nullary(
            "memoryBarrierShared",
            BuiltinOp::MemoryBarrierShared,
            Some(&[ShaderStage::Compute]),
        );
        b.nullary(
            "groupMemoryBarrier",
            BuiltinOp::GroupMemoryBarrier,
            Some(&[ShaderStage::Compute]),
        );

        Builtins { map: b.map }
    }
}

/// Scalar-or-vector shape used while enumerating generic signatures:
/// 0 for scalar, 2..4 for vectors.
const SHAPES: [u8; 4] = [0, 2, 3, 4];

struct Builder<'a> {
    map: HashMap<&'static str, Vec<BuiltinSig>>,
    types: &'a mut Types,
}

trait ShapeExt {
    fn shaped(&mut self, scalar: Ty, shape: u8) -> Ty;
    fn bool_shape(&mut self, shape: u8) -> Ty;
}

impl ShapeExt for Types {
    fn shaped(&mut self, scalar: Ty, shape: u8) -> Ty {
        if shape == 0 {
            scalar
        } else {
            self.vector(scalar, shape)
        }
    }

    fn bool_shape(&mut self, shape: u8) -> Ty {
        self.shaped(Ty::BOOL, shape)
    }
}

impl<'a> Builder<'a> {
    fn add(&mut self, name: &'static str, sig: BuiltinSig) {
        self.map.entry(name).or_default().push(sig);
    }

    fn simple(&mut self, name: &'static str, params: Vec<Ty>, ret: Ty, op: BuiltinOp) {
        self.add(
            name,
            BuiltinSig {
                params,
                ret,
                op,
                stages: None,
            },
        );
    }

    /// `genFType f(genFType)` over all shapes.
    fn gen_f1(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![t], t, op);
        }
    }

    fn gen_f1_staged(&mut self, name: &'static str, op: BuiltinOp, stages: &'static [ShaderStage]) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.add(
                name,
                BuiltinSig {
                    params: vec![t],
                    ret: t,
                    op,
                    stages: Some(stages),
                },
            );
        }
    }

    fn gen_f1_ret(
        &mut self,
        name: &'static str,
        ret: impl Fn(&mut Types, u8) -> Ty,
        op: BuiltinOp,
    ) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            let r = ret(self.types, shape);
            self.simple(name, vec![t], r, op);
        }
    }

    fn gen_f2(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![t, t], t, op);
        }
    }

    fn gen_f2_ret(
        &mut self,
        name: &'static str,
        ret: impl Fn(&mut Types, u8) -> Ty,
        op: BuiltinOp,
    ) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            let r = ret(self.types, shape);
            self.simple(name, vec![t, t], r, op);
        }
    }

    /// `genFType f(genFType, float)` for vector shapes only.
    fn gen_f2_mixed(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES.into_iter().skip(1) {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![t, Ty::FLOAT], t, op);
        }
    }

    /// `genFType f(float, genFType)` for vector shapes only.
    fn gen_f2_scalar_first(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES.into_iter().skip(1) {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![Ty::FLOAT, t], t, op);
        }
    }

    fn gen_f3(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![t, t, t], t, op);
        }
    }

    /// `genFType f(genFType, float, float)` for vector shapes only.
    fn gen_f3_mixed(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES.into_iter().skip(1) {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![t, Ty::FLOAT, Ty::FLOAT], t, op);
        }
    }

    /// `genFType f(float, float, genFType)` for vector shapes only.
    fn gen_f3_scalar_edges(&mut self, name: &'static str, op: BuiltinOp) {
        for shape in SHAPES.into_iter().skip(1) {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(name, vec![Ty::FLOAT, Ty::FLOAT, t], t, op);
        }
    }

    fn gen_i1(&mut self, name: &'static str, scalar: Ty, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(scalar, shape);
            self.simple(name, vec![t], t, op);
        }
    }

    fn gen_i2(&mut self, name: &'static str, scalar: Ty, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(scalar, shape);
            self.simple(name, vec![t, t], t, op);
        }
    }

    fn gen_i3(&mut self, name: &'static str, scalar: Ty, op: BuiltinOp) {
        for shape in SHAPES {
            let t = self.types.shaped(scalar, shape);
            self.simple(name, vec![t, t, t], t, op);
        }
    }

    fn nullary(&mut self, name: &'static str, op: BuiltinOp, stages: Option<&'static [ShaderStage]>) {
        self.add(
            name,
            BuiltinSig {
                params: vec![],
                ret: Ty::VOID,
                op,
                stages,
            },
        );
    }

    fn cross(&mut self) {
        let vec3 = self.types.vector(Ty::FLOAT, 3);
        self.simple(
            "cross",
            vec![vec3, vec3],
            vec3,
            BuiltinOp::Ext(spirv::GLOp::Cross),
        );
    }

    fn refract(&mut self) {
        for shape in SHAPES {
            let t = self.types.shaped(Ty::FLOAT, shape);
            self.simple(
                "refract",
                vec![t, t, Ty::FLOAT],
                t,
                BuiltinOp::Ext(spirv::GLOp::Refract),
            );
        }
    }

    fn bitcasts(&mut self) {
        for shape in SHAPES {
            let f = self.types.shaped(Ty::FLOAT, shape);
            let i = self.types.shaped(Ty::INT, shape);
            let u = self.types.shaped(Ty::UINT, shape);
            self.simple("floatBitsToInt", vec![f], i, BuiltinOp::Bitcast);
            self.simple("floatBitsToUint", vec![f], u, BuiltinOp::Bitcast);
            self.simple("intBitsToFloat", vec![i], f, BuiltinOp::Bitcast);
            self.simple("uintBitsToFloat", vec![u], f, BuiltinOp::Bitcast);
        }
    }

    fn matrix_builtins(&mut self) {
        for cols in 2u8..=4 {
            for rows in 2u8..=4 {
                let m = self.types.matrix(cols, rows, Ty::FLOAT);
                let t = self.types.matrix(rows, cols, Ty::FLOAT);
                self.simple("transpose", vec![m], t, BuiltinOp::Transpose);

                let col = self.types.vector(Ty::FLOAT, rows);
                let row = self.types.vector(Ty::FLOAT, cols);
                self.simple("outerProduct", vec![col, row], m, BuiltinOp::OuterProduct);
            }
            // Determinant and inverse exist for square matrices only.
            let m = self.types.matrix(cols, cols, Ty::FLOAT);
            self.simple(
                "determinant",
                vec![m],
                Ty::FLOAT,
                BuiltinOp::Ext(spirv::GLOp::Determinant),
            );
            self.simple(
                "inverse",
                vec![m],
                m,
                BuiltinOp::Ext(spirv::GLOp::MatrixInverse),
            );
        }
    }

    fn relational(&mut self, name: &'static str, op: BuiltinOp, ordered_only: bool) {
        for size in 2u8..=4 {
            let bvec = self.types.vector(Ty::BOOL, size);
            for scalar in [Ty::FLOAT, Ty::INT, Ty::UINT] {
                let v = self.types.vector(scalar, size);
                self.simple(name, vec![v, v], bvec, op);
            }
            if !ordered_only {
                let bv = self.types.vector(Ty::BOOL, size);
                self.simple(name, vec![bv, bv], bvec, op);
            }
        }
    }

    fn bool_reductions(&mut self) {
        for size in 2u8..=4 {
            let bvec = self.types.vector(Ty::BOOL, size);
            self.simple("any", vec![bvec], Ty::BOOL, BuiltinOp::Any);
            self.simple("all", vec![bvec], Ty::BOOL, BuiltinOp::All);
            self.simple("not", vec![bvec], bvec, BuiltinOp::LogicalNot);
        }
    }

    fn texture_builtins(&mut self) {
        let images: Vec<ImageType> = {
            let mut v = Vec::new();
            for sampled in [Ty::FLOAT, Ty::INT, Ty::UINT] {
                for dim in [ImageDim::D1, ImageDim::D2, ImageDim::D3, ImageDim::Cube] {
                    v.push(ImageType {
                        sampled,
                        dim,
                        depth: false,
                        arrayed: false,
                        ms: false,
                    });
                    if matches!(dim, ImageDim::D1 | ImageDim::D2 | ImageDim::Cube) {
                        v.push(ImageType {
                            sampled,
                            dim,
                            depth: false,
                            arrayed: true,
                            ms: false,
                        });
                    }
                }
            }
            // Shadow samplers: float only, compare value rides in the coord.
            v.push(ImageType {
                sampled: Ty::FLOAT,
                dim: ImageDim::D2,
                depth: true,
                arrayed: false,
                ms: false,
            });
            v.push(ImageType {
                sampled: Ty::FLOAT,
                dim: ImageDim::Cube,
                depth: true,
                arrayed: false,
                ms: false,
            });
            v
        };

        for image in images {
            let sampler = self.types.sampled_image(image);
            let base = image.coord_components();
            let coord_n = base + u8::from(image.arrayed) + u8::from(image.depth);
            let coord = self.types.shaped(Ty::FLOAT, if coord_n == 1 { 0 } else { coord_n });
            let ret = if image.depth {
                Ty::FLOAT
            } else {
                self.types.vector(image.sampled, 4)
            };

            self.simple("texture", vec![sampler, coord], ret, BuiltinOp::Texture);
            self.add(
                "texture",
                BuiltinSig {
                    params: vec![sampler, coord, Ty::FLOAT],
                    ret,
                    op: BuiltinOp::Texture,
                    stages: Some(FRAGMENT_ONLY),
                },
            );
            if !image.depth {
                self.simple(
                    "textureLod",
                    vec![sampler, coord, Ty::FLOAT],
                    ret,
                    BuiltinOp::TextureLod,
                );
            }

            let size_n = base + u8::from(image.arrayed);
            let size_ty = self.types.shaped(Ty::INT, if size_n == 1 { 0 } else { size_n });
            self.simple(
                "textureSize",
                vec![sampler, Ty::INT],
                size_ty,
                BuiltinOp::TextureSize,
            );

            // texelFetch applies to non-shadow, non-cube samplers.
            if !image.depth && image.dim != ImageDim::Cube {
                let icoord = self.types.shaped(Ty::INT, if size_n == 1 { 0 } else { size_n });
                self.simple(
                    "texelFetch",
                    vec![sampler, icoord, Ty::INT],
                    ret,
                    BuiltinOp::TexelFetch,
                );
            }
        }
    }
}

impl ImageType {
    /// Coordinate components for the base dimensionality.
    pub fn coord_components(&self) -> u8 {
        match self.dim {
            ImageDim::D1 => 1,
            ImageDim::D2 => 2,
            ImageDim::D3 | ImageDim::Cube => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Types, Builtins) {
        let mut types = Types::new();
        let builtins = Builtins::new(&mut types);
        (types, builtins)
    }

    fn resolve<'a>(
        types: &Types,
        builtins: &'a Builtins,
        name: &str,
        args: &[Ty],
    ) -> OverloadChoice<&'a BuiltinSig> {
        let sigs = builtins.get(name).unwrap();
        select_overload(
            types,
            sigs.iter().map(|s| (s.params.as_slice(), s)),
            args,
        )
    }

    #[test]
    fn test_exact_overload() {
        let (mut types, builtins) = setup();
        let vec3 = types.from_name("vec3").unwrap();
        let OverloadChoice::Unique(sig) = resolve(&types, &builtins, "normalize", &[vec3]) else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, vec3);
    }

    #[test]
    fn test_implicit_conversion_overload() {
        let (types, builtins) = setup();
        // pow(int, int) converts to pow(float, float).
        let OverloadChoice::Unique(sig) =
            resolve(&types, &builtins, "pow", &[Ty::INT, Ty::INT])
        else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, Ty::FLOAT);
    }

    #[test]
    fn test_no_match() {
        let (types, builtins) = setup();
        assert_eq!(
            resolve(&types, &builtins, "normalize", &[Ty::BOOL]),
            OverloadChoice::NoMatch
        );
    }

    #[test]
    fn test_ambiguous_min() {
        let (types, builtins) = setup();
        // min(int, uint): neither exact; converts to (uint, uint), (float,
        // float), and the mixed vector forms are filtered by arity. Both
        // scalar candidates survive.
        let result = resolve(&types, &builtins, "min", &[Ty::INT, Ty::UINT]);
        assert_eq!(result, OverloadChoice::Ambiguous);
    }

    #[test]
    fn test_dot_returns_scalar() {
        let (mut types, builtins) = setup();
        let vec4 = types.from_name("vec4").unwrap();
        let OverloadChoice::Unique(sig) = resolve(&types, &builtins, "dot", &[vec4, vec4]) else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, Ty::FLOAT);
        assert_eq!(sig.op, BuiltinOp::Dot);
    }

    #[test]
    fn test_texture_signature() {
        let (mut types, builtins) = setup();
        let sampler = types.from_name("sampler2D").unwrap();
        let vec2 = types.from_name("vec2").unwrap();
        let vec4 = types.from_name("vec4").unwrap();
        let OverloadChoice::Unique(sig) =
            resolve(&types, &builtins, "texture", &[sampler, vec2])
        else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, vec4);
    }

    #[test]
    fn test_shadow_sampler_returns_float() {
        let (mut types, builtins) = setup();
        let sampler = types.from_name("sampler2DShadow").unwrap();
        let vec3 = types.from_name("vec3").unwrap();
        let OverloadChoice::Unique(sig) =
            resolve(&types, &builtins, "texture", &[sampler, vec3])
        else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, Ty::FLOAT);
    }

    #[test]
    fn test_stage_restrictions_recorded() {
        let (mut types, builtins) = setup();
        let vec2 = types.from_name("vec2").unwrap();
        let OverloadChoice::Unique(sig) = resolve(&types, &builtins, "dFdx", &[vec2]) else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.stages, Some(&[ShaderStage::Fragment][..]));
        let OverloadChoice::Unique(barrier) = resolve(&types, &builtins, "barrier", &[]) else {
            panic!("expected unique overload");
        };
        assert!(barrier
            .stages
            .is_some_and(|s| s.contains(&ShaderStage::Compute)));
    }

    #[test]
    fn test_relational_returns_bvec() {
        let (mut types, builtins) = setup();
        let ivec3 = types.from_name("ivec3").unwrap();
        let bvec3 = types.from_name("bvec3").unwrap();
        let OverloadChoice::Unique(sig) =
            resolve(&types, &builtins, "lessThan", &[ivec3, ivec3])
        else {
            panic!("expected unique overload");
        };
        assert_eq!(sig.ret, bvec3);
    }
}
