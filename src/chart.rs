//! Structure charts
//!
//! A chart is the dictionary of types a file knows about. Every open file
//! carries two: the file chart describes how each type is laid out on disk
//! (under the file's data standard and alignment), and the host chart
//! describes the same types laid out in host buffers. A type converts on
//! read or write exactly when its two descriptions differ.
//!
//! Types are either primitive (a size, a byte order, possibly a float
//! format) or derived (an ordered member list). Member descriptors are
//! plain text, `"double * xyz[0:2,10]"`, parsed here into [`Member`].
//!
//! Installation is first-definition-wins: installing a name that already
//! exists returns the original descriptor untouched.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{PdbError, PdbResult};
use crate::standard::{Alignment, ByteOrder, FloatFormat, NumericStandard};

/// One dimension of a member or entry, inclusive index range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub index_min: i64,
    pub index_max: i64,
}

impl Dimension {
    pub fn new(index_min: i64, index_max: i64) -> Dimension {
        Dimension { index_min, index_max }
    }

    pub fn number(&self) -> u64 {
        (self.index_max - self.index_min + 1).max(0) as u64
    }
}

/// Product of dimension extents; 1 for a scalar.
pub fn comp_num(dims: &[Dimension]) -> u64 {
    dims.iter().fold(1u64, |n, d| n.saturating_mul(d.number()))
}

/// One member of a derived type.
#[derive(Clone, Debug, Serialize)]
pub struct Member {
    /// Original descriptor text, `"type name[dims]"`
    pub member: String,
    /// Full type including indirection stars, e.g. `"char *"`
    pub ty: String,
    /// Type with all stars stripped
    pub base_type: String,
    pub name: String,
    pub dims: Vec<Dimension>,
    /// Items this member holds (dimension product)
    pub number: u64,
    /// Byte offset inside the parent struct, per this chart's alignment
    pub offset: usize,
    /// Name of the controller member whose string value resolves the true
    /// type of this pointer at read/write time
    pub cast_memb: Option<String>,
    /// Offset of the controller member inside the parent struct
    pub cast_offs: usize,
}

/// True when a type name carries at least one level of indirection.
pub fn is_indirect(ty: &str) -> bool {
    ty.contains('*')
}

/// Strip one level of indirection from a type name.
pub fn deref_type(ty: &str) -> String {
    match ty.rfind('*') {
        Some(i) => ty[..i].trim_end().to_string(),
        None => ty.to_string(),
    }
}

/// Type name with all indirection stripped.
pub fn base_type(ty: &str) -> &str {
    ty.trim_end_matches(|c: char| c == '*' || c == ' ')
}

/// Add one level of indirection to a type name.
pub fn ref_type(ty: &str) -> String {
    if ty.ends_with('*') {
        format!("{}*", ty)
    } else {
        format!("{} *", ty)
    }
}

/// Parse a dimension list, `"10"`, `"0:9"`, `"2,5,1:3"`. Undecorated
/// extents start at `default_offset`.
pub fn parse_dimensions(text: &str, default_offset: i64) -> PdbResult<Vec<Dimension>> {
    let mut dims = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(PdbError::format(format!("empty dimension in {:?}", text)));
        }
        let dim = match part.split_once(':') {
            Some((lo, hi)) => {
                let lo: i64 = lo.trim().parse().map_err(|_| {
                    PdbError::format(format!("bad dimension bound in {:?}", text))
                })?;
                let hi: i64 = hi.trim().parse().map_err(|_| {
                    PdbError::format(format!("bad dimension bound in {:?}", text))
                })?;
                Dimension::new(lo, hi)
            }
            None => {
                let n: i64 = part.parse().map_err(|_| {
                    PdbError::format(format!("bad dimension extent in {:?}", text))
                })?;
                if n < 1 {
                    return Err(PdbError::format(format!(
                        "non-positive dimension extent in {:?}",
                        text
                    )));
                }
                Dimension::new(default_offset, default_offset + n - 1)
            }
        };
        dims.push(dim);
    }
    Ok(dims)
}

/// Parse a member descriptor, `"base [stars] name [\[dims\]]"`.
pub fn parse_member(descriptor: &str, default_offset: i64) -> PdbResult<Member> {
    let text = descriptor.trim();

    // split off a trailing dimension list in [] or ()
    let (head, dims) = match text.find(|c| c == '[' || c == '(') {
        Some(open) => {
            let close = match text.as_bytes()[open] {
                b'[' => ']',
                _ => ')',
            };
            let rest = &text[open + 1..];
            let end = rest.find(close).ok_or_else(|| {
                PdbError::format(format!("unterminated dimensions in member {:?}", descriptor))
            })?;
            (text[..open].trim(), parse_dimensions(&rest[..end], default_offset)?)
        }
        None => (text, Vec::new()),
    };

    let mut tokens: Vec<&str> = head.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(PdbError::format(format!(
            "member descriptor {:?} needs a type and a name",
            descriptor
        )));
    }
    let mut name = tokens.pop().unwrap_or_default().to_string();

    // stars may be glued to the name or stand alone
    let mut stars = 0usize;
    while name.starts_with('*') {
        stars += 1;
        name.remove(0);
    }
    while tokens.last().is_some_and(|t| t.chars().all(|c| c == '*')) {
        stars += tokens.pop().map(|t| t.len()).unwrap_or(0);
    }
    if name.is_empty() {
        return Err(PdbError::format(format!("member descriptor {:?} has no name", descriptor)));
    }

    let base_type = tokens.join(" ");
    if base_type.is_empty() {
        return Err(PdbError::format(format!("member descriptor {:?} has no type", descriptor)));
    }

    let ty = if stars > 0 {
        format!("{} {}", base_type, "*".repeat(stars))
    } else {
        base_type.clone()
    };

    let number = if dims.is_empty() { 1 } else { comp_num(&dims) };

    Ok(Member {
        member: text.to_string(),
        ty,
        base_type,
        name,
        dims,
        number,
        offset: 0,
        cast_memb: None,
        cast_offs: 0,
    })
}

/// One type as laid out under a particular chart.
#[derive(Clone, Debug, Serialize)]
pub struct Defstr {
    pub name: String,
    /// Bytes per item under this chart
    pub size: usize,
    /// Non-zero for bit-packed primitives narrower than a byte multiple
    pub size_bits: u64,
    pub alignment: usize,
    /// Number of indirect members (any depth of the member tree counts one
    /// per direct pointer member)
    pub n_indirects: usize,
    /// True when this type's file and host layouts differ
    pub convert: bool,
    pub unsigned: bool,
    pub onescmp: bool,
    /// Fixed-point byte order; `None` for types with no integral order
    pub order_flag: Option<ByteOrder>,
    /// Explicit byte permutation for floating point types
    pub order: Vec<u8>,
    pub format: Option<FloatFormat>,
    pub members: Vec<Member>,
}

impl Defstr {
    pub fn is_primitive(&self) -> bool {
        self.members.is_empty()
    }

    fn primitive(name: &str, size: usize, alignment: usize) -> Defstr {
        Defstr {
            name: name.to_string(),
            size,
            size_bits: 0,
            alignment,
            n_indirects: 0,
            convert: false,
            unsigned: false,
            onescmp: false,
            order_flag: None,
            order: Vec::new(),
            format: None,
            members: Vec::new(),
        }
    }
}

/// The type dictionary of one side (file or host) of an open file.
pub struct Chart {
    map: FxHashMap<String, Rc<Defstr>>,
    names: Vec<String>,
    pub std: NumericStandard,
    pub align: Alignment,
    /// Host charts never convert
    pub host_side: bool,
}

impl Chart {
    pub fn new(std: NumericStandard, align: Alignment, host_side: bool) -> Chart {
        Chart { map: FxHashMap::default(), names: Vec::new(), std, align, host_side }
    }

    /// Build a chart pre-seeded with the default primitive types. The
    /// convert flag of each is decided against `host`, the standard of the
    /// opposite chart.
    pub fn seeded(
        std: NumericStandard,
        align: Alignment,
        host: &NumericStandard,
        host_side: bool,
    ) -> Chart {
        let mut chart = Chart::new(std, align, host_side);
        chart.seed_primitives(host);
        chart
    }

    fn seed_primitives(&mut self, host: &NumericStandard) {
        let std = self.std.clone();
        let align = self.align;
        let host_side = self.host_side;

        let conv = |differs: bool| !host_side && differs;

        let mut ptr = Defstr::primitive("*", std.ptr_bytes, align.ptr_align);
        ptr.convert = conv(std.ptr_bytes != host.ptr_bytes);
        self.install_rc(ptr);

        let char_d = Defstr::primitive("char", 1, align.char_align);
        self.install_rc(char_d);

        let mut short = Defstr::primitive("short", std.short_bytes, align.short_align);
        short.order_flag = Some(std.short_order);
        short.convert =
            conv(std.short_bytes != host.short_bytes || std.short_order != host.short_order);
        self.install_rc(short);

        let int_differs = std.int_bytes != host.int_bytes || std.int_order != host.int_order;
        for name in ["int", "integer"] {
            let mut d = Defstr::primitive(name, std.int_bytes, align.int_align);
            d.order_flag = Some(std.int_order);
            d.convert = conv(int_differs);
            self.install_rc(d);
        }

        let mut long = Defstr::primitive("long", std.long_bytes, align.long_align);
        long.order_flag = Some(std.long_order);
        long.convert =
            conv(std.long_bytes != host.long_bytes || std.long_order != host.long_order);
        self.install_rc(long);

        let ll_differs = std.longlong_bytes != host.longlong_bytes
            || std.longlong_order != host.longlong_order;
        let mut ll = Defstr::primitive("long_long", std.longlong_bytes, align.longlong_align);
        ll.order_flag = Some(std.longlong_order);
        ll.convert = conv(ll_differs);
        self.install_rc(ll);

        let mut ull = Defstr::primitive("u_long_long", std.longlong_bytes, align.longlong_align);
        ull.order_flag = Some(std.longlong_order);
        ull.unsigned = true;
        ull.convert = conv(ll_differs);
        self.install_rc(ull);

        let mut float = Defstr::primitive("float", std.float_bytes, align.float_align);
        float.order = std.float_order.clone();
        float.format = Some(std.float_format);
        float.convert = conv(
            std.float_bytes != host.float_bytes
                || std.float_order != host.float_order
                || std.float_format != host.float_format,
        );
        self.install_rc(float);

        let mut double = Defstr::primitive("double", std.double_bytes, align.double_align);
        double.order = std.double_order.clone();
        double.format = Some(std.double_format);
        double.convert = conv(
            std.double_bytes != host.double_bytes
                || std.double_order != host.double_order
                || std.double_format != host.double_format,
        );
        self.install_rc(double);
    }

    fn install_rc(&mut self, d: Defstr) -> Rc<Defstr> {
        if let Some(existing) = self.map.get(&d.name) {
            return Rc::clone(existing);
        }
        let name = d.name.clone();
        let rc = Rc::new(d);
        self.map.insert(name.clone(), Rc::clone(&rc));
        self.names.push(name);
        rc
    }

    /// Install a fully built descriptor. First definition wins.
    pub fn install(&mut self, d: Defstr) -> Rc<Defstr> {
        self.install_rc(d)
    }

    /// Look a type up. Any indirect type resolves to the pointer entry.
    pub fn lookup(&self, ty: &str) -> Option<Rc<Defstr>> {
        let key = if is_indirect(ty) { "*" } else { ty };
        self.map.get(key).map(Rc::clone)
    }

    pub fn lookup_required(&self, ty: &str) -> PdbResult<Rc<Defstr>> {
        self.lookup(ty)
            .ok_or_else(|| PdbError::type_err(format!("no such type {:?}", ty)))
    }

    /// Bytes per item of a type under this chart.
    pub fn size_of(&self, ty: &str) -> PdbResult<usize> {
        Ok(self.lookup_required(ty)?.size)
    }

    /// Alignment of a type under this chart. Indirect types align as
    /// pointers regardless of base type.
    pub fn align_of(&self, ty: &str) -> PdbResult<usize> {
        if is_indirect(ty) {
            return Ok(self.align.ptr_align);
        }
        Ok(self.lookup_required(ty)?.alignment.max(1))
    }

    /// Padding needed to align an offset for a type.
    pub fn align_pad(&self, offset: usize, ty: &str) -> PdbResult<usize> {
        let al = self.align_of(ty)?;
        if al == 0 {
            return Ok(0);
        }
        Ok((al - offset % al) % al)
    }

    /// Compute offsets, total size, and alignment of a member list under
    /// this chart. Returns (size, alignment) and fills `offset` in place.
    pub fn size_members(&self, members: &mut [Member]) -> PdbResult<(usize, usize)> {
        let mut size = 0usize;
        let mut align_max = self.align.struct_align.max(1);
        for m in members.iter_mut() {
            let al = self.align_of(&m.ty)?;
            size += self.align_pad(size, &m.ty)?;
            m.offset = size;
            size += (m.number as usize) * self.size_of(&m.ty)?;
            align_max = align_max.max(al);
        }
        if align_max > 1 && size % align_max != 0 {
            size += align_max - size % align_max;
        }
        Ok((size, align_max))
    }

    /// Install a derived type from parsed members. The members get offsets
    /// under this chart; the convert flag is inherited from the members on
    /// file charts. First definition wins.
    pub fn install_struct(&mut self, name: &str, mut members: Vec<Member>) -> PdbResult<Rc<Defstr>> {
        if let Some(existing) = self.map.get(name) {
            return Ok(Rc::clone(existing));
        }
        let mut convert = false;
        let mut n_indirects = 0usize;
        for m in &members {
            if is_indirect(&m.ty) {
                // itag trees are emitted per direct pointer member only
                n_indirects += 1;
                convert = true;
                continue;
            }
            let md = self.lookup_required(&m.ty)?;
            convert = convert || md.convert;
        }
        let (size, alignment) = self.size_members(&mut members)?;
        let d = Defstr {
            name: name.to_string(),
            size,
            size_bits: 0,
            alignment,
            n_indirects,
            convert: !self.host_side && convert,
            unsigned: false,
            onescmp: false,
            order_flag: None,
            order: Vec::new(),
            format: None,
            members,
        };
        Ok(self.install_rc(d))
    }

    /// Record a cast: `member` of `ty` is a pointer whose true type is
    /// named at run time by the `char *` member `controller`.
    pub fn set_cast(&mut self, ty: &str, member: &str, controller: &str) -> PdbResult<()> {
        let rc = self
            .map
            .get_mut(ty)
            .ok_or_else(|| PdbError::type_err(format!("no such type {:?}", ty)))?;
        let d = Rc::make_mut(rc);
        let cast_offs = d
            .members
            .iter()
            .find(|m| m.name == controller)
            .filter(|m| m.base_type == "char" && is_indirect(&m.ty))
            .map(|m| m.offset)
            .ok_or_else(|| {
                PdbError::type_err(format!(
                    "cast controller {:?} is not a char * member of {:?}",
                    controller, ty
                ))
            })?;
        let target = d
            .members
            .iter_mut()
            .find(|m| m.name == member && is_indirect(&m.ty))
            .ok_or_else(|| {
                PdbError::type_err(format!("cast member {:?} is not a pointer member of {:?}", member, ty))
            })?;
        target.cast_memb = Some(controller.to_string());
        target.cast_offs = cast_offs;
        Ok(())
    }

    /// All casts registered in this chart, `(type, member, controller)`.
    pub fn casts(&self) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        for name in &self.names {
            if let Some(d) = self.map.get(name) {
                for m in &d.members {
                    if let Some(c) = &m.cast_memb {
                        out.push((name.clone(), m.name.clone(), c.clone()));
                    }
                }
            }
        }
        out
    }

    /// Types in installation order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Defstr>> {
        self.names.iter().filter_map(move |n| self.map.get(n))
    }

    /// Derived types in installation order (the serializable part of the
    /// chart; primitives travel in the extras table instead).
    pub fn iter_derived(&self) -> impl Iterator<Item = &Rc<Defstr>> {
        self.iter().filter(|d| !d.is_primitive())
    }

    /// Non-default primitives in installation order.
    pub fn iter_extra_primitives(&self) -> impl Iterator<Item = &Rc<Defstr>> {
        self.iter().filter(|d| d.is_primitive() && !DEFAULT_PRIMITIVES.contains(&d.name.as_str()))
    }

    pub fn contains(&self, ty: &str) -> bool {
        self.map.contains_key(if is_indirect(ty) { "*" } else { ty })
    }

    /// JSON description of every installed type, for schema dumps.
    pub fn describe(&self) -> serde_json::Value {
        let types: Vec<&Defstr> = self.iter().map(|rc| rc.as_ref()).collect();
        serde_json::json!({ "types": types })
    }
}

/// Names seeded into every chart at open time.
pub const DEFAULT_PRIMITIVES: &[&str] = &[
    "*",
    "char",
    "short",
    "int",
    "integer",
    "long",
    "long_long",
    "u_long_long",
    "float",
    "double",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::{Alignment, NumericStandard};

    fn host_chart() -> Chart {
        let std = NumericStandard::host();
        Chart::seeded(std.clone(), Alignment::HOST, &std, true)
    }

    #[test]
    fn parse_member_handles_stars_and_dims() {
        let m = parse_member("double * xyz[0:2,10]", 0).unwrap();
        assert_eq!(m.ty, "double *");
        assert_eq!(m.base_type, "double");
        assert_eq!(m.name, "xyz");
        assert_eq!(m.dims.len(), 2);
        assert_eq!(m.number, 30);

        let m = parse_member("char **names", 0).unwrap();
        assert_eq!(m.ty, "char **");
        assert_eq!(m.name, "names");
        assert_eq!(m.number, 1);
    }

    #[test]
    fn parse_member_rejects_nameless_descriptors() {
        assert!(parse_member("double", 0).is_err());
        assert!(parse_member("double *", 0).is_err());
        assert!(parse_member("double x[3", 0).is_err());
    }

    #[test]
    fn dimensions_honor_default_offset() {
        let dims = parse_dimensions("5", 1).unwrap();
        assert_eq!(dims[0], Dimension::new(1, 5));
        let dims = parse_dimensions("2:4", 1).unwrap();
        assert_eq!(dims[0], Dimension::new(2, 4));
        assert_eq!(comp_num(&parse_dimensions("3,4", 0).unwrap()), 12);
    }

    #[test]
    fn indirect_counts_cover_direct_members_only() {
        let mut c = host_chart();
        let inner = vec![
            parse_member("double *p", 0).unwrap(),
            parse_member("double x", 0).unwrap(),
        ];
        let d = c.install_struct("inner", inner).unwrap();
        assert_eq!(d.n_indirects, 1);

        let outer = vec![
            parse_member("inner body", 0).unwrap(),
            parse_member("long n", 0).unwrap(),
        ];
        let d = c.install_struct("outer", outer).unwrap();
        assert_eq!(d.n_indirects, 0);

        let ptrs = vec![
            parse_member("inner *a", 0).unwrap(),
            parse_member("char **names", 0).unwrap(),
        ];
        let d = c.install_struct("ptrs", ptrs).unwrap();
        assert_eq!(d.n_indirects, 2);
    }

    #[test]
    fn host_chart_never_converts() {
        let c = host_chart();
        for d in c.iter() {
            assert!(!d.convert, "{} marked for conversion on host side", d.name);
        }
    }

    #[test]
    fn file_chart_flags_differing_primitives() {
        let c = Chart::seeded(
            NumericStandard::cray(),
            Alignment::UNICOS,
            &NumericStandard::host(),
            false,
        );
        assert!(c.lookup("int").unwrap().convert);
        assert!(c.lookup("double").unwrap().convert);
        assert!(!c.lookup("char").unwrap().convert);
    }

    #[test]
    fn struct_sizing_pads_members_and_total() {
        let mut c = host_chart();
        let members = vec![
            parse_member("char tag", 0).unwrap(),
            parse_member("double value", 0).unwrap(),
            parse_member("short id", 0).unwrap(),
        ];
        let d = c.install_struct("rec", members).unwrap();
        assert_eq!(d.members[0].offset, 0);
        assert_eq!(d.members[1].offset, 8);
        assert_eq!(d.members[2].offset, 16);
        // total rounds up to the widest member alignment
        assert_eq!(d.size, 24);
        assert_eq!(d.alignment, 8);
    }

    #[test]
    fn first_definition_wins() {
        let mut c = host_chart();
        let first = c
            .install_struct("pt", vec![parse_member("double x", 0).unwrap()])
            .unwrap();
        let second = c
            .install_struct("pt", vec![parse_member("char y", 0).unwrap()])
            .unwrap();
        assert_eq!(second.size, first.size);
        assert_eq!(second.members[0].name, "x");
    }

    #[test]
    fn indirect_members_mark_struct_for_conversion() {
        let mut c = Chart::seeded(
            NumericStandard::host(),
            Alignment::HOST,
            &NumericStandard::host(),
            false,
        );
        let d = c
            .install_struct("node", vec![parse_member("double *data", 0).unwrap()])
            .unwrap();
        assert!(d.convert);
        assert_eq!(d.n_indirects, 1);
    }

    #[test]
    fn cast_requires_char_star_controller() {
        let mut c = host_chart();
        c.install_struct(
            "box",
            vec![
                parse_member("char *kind", 0).unwrap(),
                parse_member("char *payload", 0).unwrap(),
                parse_member("long n", 0).unwrap(),
            ],
        )
        .unwrap();
        assert!(c.set_cast("box", "payload", "n").is_err());
        c.set_cast("box", "payload", "kind").unwrap();
        let d = c.lookup("box").unwrap();
        let p = d.members.iter().find(|m| m.name == "payload").unwrap();
        assert_eq!(p.cast_memb.as_deref(), Some("kind"));
        assert_eq!(p.cast_offs, 0);
        assert_eq!(c.casts(), vec![("box".into(), "payload".into(), "kind".into())]);
    }

    #[test]
    fn indirect_types_resolve_to_pointer_entry() {
        let c = host_chart();
        assert_eq!(c.size_of("double ***").unwrap(), c.std.ptr_bytes);
        assert_eq!(deref_type("double **"), "double *");
        assert_eq!(deref_type("char *"), "char");
        assert_eq!(ref_type("char"), "char *");
        assert_eq!(ref_type("char *"), "char **");
    }
}
