//! File lifecycle and the public API
//!
//! A [`PdbFile`] ties the whole engine together: a byte stream, the two
//! structure charts, the symbol table, and the bookkeeping addresses. The
//! on-disk layout is
//!
//! ```text
//! header line          "!<<PDB:II>>!\n"
//! format block         binary description of the file's numeric standard
//! bias line            float and double exponent biases
//! address line         chart and symbol table addresses (128 byte slot)
//! data...              entry data, itags, pointee blocks
//! structure chart      derived types, one record per type
//! symbol table         entries, one record per entry
//! extras table         keyed records: offset, alignment, casts, blocks...
//! ```
//!
//! The tables live at the end and are rewritten by [`PdbFile::flush`];
//! `chrtaddr` is the watermark where data ends and tables begin, so new
//! writes overwrite stale tables and a flush puts fresh ones after the
//! data again. Files carrying the older header variant (a machine profile
//! code instead of a format block) open through a fixed profile table.
//!
//! Records in the tables separate fields with `\x01` and terminate lists
//! with a `\x02` line, so field values may contain spaces freely.

use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chart::{
    comp_num, is_indirect, parse_dimensions, parse_member, Chart, Defstr, Dimension,
};
use crate::engine::{self, FileCtx};
use crate::error::{PdbError, PdbResult};
use crate::heap::Heap;
use crate::path as pathexpr;
use crate::standard::{Alignment, ByteOrder, FloatFormat, MachineProfile, MajorOrder, NumericStandard};
use crate::stream::{ByteStream, FileStream};
use crate::symtab::{SymBlock, SymbolEntry, SymbolTable};

const HEAD_TOK: &str = "!<<PDB:II>>!";
const OLD_HEAD_TOK: &str = "!<><PDB><>!";
/// Bytes reserved for the address line between the header and the data.
const PAD_SIZE: usize = 128;
const SYSTEM_VERSION: u32 = 3;

/// An open data file.
pub struct PdbFile {
    stream: Box<dyn ByteStream>,
    chart: Chart,
    host_chart: Chart,
    symtab: SymbolTable,
    writable: bool,
    /// Where the address line lives
    headaddr: u64,
    /// End of data, start of the tables
    chrtaddr: i64,
    symtaddr: i64,
    major_order: MajorOrder,
    default_offset: i64,
    system_version: u32,
    date: String,
    flushed: bool,
}

impl PdbFile {
    /// Create a new file laid out under the host standard.
    pub fn create(path: &Path) -> PdbResult<PdbFile> {
        Self::create_on(Box::new(FileStream::create(path)?))
    }

    /// Create a new file laid out under an explicit target standard, so
    /// the bytes written are what `std`'s machine would have written.
    pub fn create_target(
        path: &Path,
        std: NumericStandard,
        align: Alignment,
    ) -> PdbResult<PdbFile> {
        Self::create_target_on(Box::new(FileStream::create(path)?), std, align)
    }

    pub fn create_on(stream: Box<dyn ByteStream>) -> PdbResult<PdbFile> {
        Self::create_target_on(stream, NumericStandard::host(), Alignment::HOST)
    }

    pub fn create_target_on(
        mut stream: Box<dyn ByteStream>,
        std: NumericStandard,
        align: Alignment,
    ) -> PdbResult<PdbFile> {
        stream.write_str(HEAD_TOK)?;
        stream.write_str("\n")?;
        wr_format(stream.as_mut(), &std)?;

        let headaddr = stream.tell()?;
        stream.write_all_bytes(&[0u8; PAD_SIZE])?;
        let chrtaddr = headaddr as i64 + PAD_SIZE as i64;
        stream.seek_to(chrtaddr as u64)?;

        let host_std = NumericStandard::host();
        let chart = Chart::seeded(std, align, &host_std, false);
        let host_chart = Chart::seeded(host_std.clone(), Alignment::HOST, &host_std, true);

        let date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default();

        log::info!("created file, data starts at {}", chrtaddr);
        Ok(PdbFile {
            stream,
            chart,
            host_chart,
            symtab: SymbolTable::new(),
            writable: true,
            headaddr,
            chrtaddr,
            symtaddr: 0,
            major_order: MajorOrder::Row,
            default_offset: 0,
            system_version: SYSTEM_VERSION,
            date,
            flushed: false,
        })
    }

    /// Open an existing file for reading and appending.
    pub fn open(path: &Path) -> PdbResult<PdbFile> {
        Self::open_on(Box::new(FileStream::open(path)?), true)
    }

    /// Open an existing file read-only.
    pub fn open_read(path: &Path) -> PdbResult<PdbFile> {
        Self::open_on(Box::new(FileStream::open_read(path)?), false)
    }

    pub fn open_on(mut stream: Box<dyn ByteStream>, writable: bool) -> PdbResult<PdbFile> {
        stream.seek_to(0)?;
        let header = stream.require_line("file header")?;
        let mut toks = header.split_whitespace();

        let mut legacy_align = None;
        let std = match toks.next() {
            Some(HEAD_TOK) => rd_format(stream.as_mut())?,
            Some(OLD_HEAD_TOK) => {
                // pre-format-block file: the second token names the machine
                let code = toks
                    .next()
                    .and_then(|t| t.parse::<i64>().ok())
                    .ok_or_else(|| PdbError::format("legacy header is missing its machine code"))?;
                let (std, align) = match MachineProfile::from_code(code) {
                    Some(p) => p.standard(),
                    None => (NumericStandard::def(), Alignment::DEF),
                };
                legacy_align = Some(align);
                std
            }
            _ => return Err(PdbError::format("not a recognized data file header")),
        };

        let headaddr = stream.tell()?;
        let addr_line = stream.require_line("table addresses")?;
        let mut fields = addr_line.split('\u{1}');
        let chrtaddr = parse_i64(fields.next().unwrap_or(""), "chart address")?;
        let symtaddr = parse_i64(fields.next().unwrap_or(""), "symbol table address")?;

        stream.seek_to(symtaddr as u64)?;
        let mut symtab = rd_symt(stream.as_mut())?;
        let ex = rd_extras(stream.as_mut())?;

        let mut std = std;
        let mut align = ex.align.or(legacy_align).unwrap_or(Alignment::DEF);
        if let Some((bytes, order, al)) = ex.longlong {
            std.longlong_bytes = bytes;
            if let Some(o) = ByteOrder::from_code(order) {
                std.longlong_order = o;
            }
            align.longlong_align = al;
        }
        if let Some(sa) = ex.struct_align {
            align.struct_align = sa;
        }

        let host_std = NumericStandard::host();
        let mut chart = Chart::seeded(std, align, &host_std, false);
        let mut host_chart = Chart::seeded(host_std.clone(), Alignment::HOST, &host_std, true);
        install_prim_extras(&mut chart, &mut host_chart, &ex.primitives);

        stream.seek_to(chrtaddr as u64)?;
        rd_chrt(stream.as_mut(), &mut chart, &mut host_chart, ex.default_offset)?;

        for (ty, member, controller) in &ex.casts {
            if let Err(e) = chart
                .set_cast(ty, member, controller)
                .and_then(|_| host_chart.set_cast(ty, member, controller))
            {
                log::warn!("ignoring stale cast {}.{}: {}", ty, member, e);
            }
        }

        let major_order = ex.major_order.unwrap_or(MajorOrder::Row);
        apply_block_extras(&mut symtab, &ex.blocks, major_order);

        stream.seek_to(chrtaddr as u64)?;

        log::info!(
            "opened file: {} symbols, {} types, data ends at {}",
            symtab.len(),
            chart.iter().count(),
            chrtaddr
        );
        Ok(PdbFile {
            stream,
            chart,
            host_chart,
            symtab,
            writable,
            headaddr,
            chrtaddr,
            symtaddr,
            major_order,
            default_offset: ex.default_offset,
            system_version: ex.version.0,
            date: ex.version.1,
            flushed: true,
        })
    }

    pub fn major_order(&self) -> MajorOrder {
        self.major_order
    }

    pub fn set_major_order(&mut self, order: MajorOrder) {
        self.major_order = order;
        self.flushed = false;
    }

    pub fn default_offset(&self) -> i64 {
        self.default_offset
    }

    /// Index origin applied to undecorated dimension extents.
    pub fn set_default_offset(&mut self, offset: i64) {
        self.default_offset = offset;
        self.flushed = false;
    }

    pub fn version(&self) -> u32 {
        self.system_version
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn host_chart(&self) -> &Chart {
        &self.host_chart
    }

    pub fn symtab(&self) -> &SymbolTable {
        &self.symtab
    }

    /// Symbol table entry for a literal name, no path resolution.
    pub fn inquire_entry(&self, name: &str) -> Option<&SymbolEntry> {
        self.symtab.lookup(name.trim())
    }

    /// File chart descriptor of a type.
    pub fn inquire_type(&self, ty: &str) -> Option<Rc<Defstr>> {
        self.chart.lookup(ty)
    }

    /// JSON description of the file's types and symbols.
    pub fn schema_json(&self) -> serde_json::Value {
        serde_json::json!({
            "version": self.system_version,
            "date": self.date,
            "chart": self.chart.describe(),
            "symtab": self.symtab.describe(),
        })
    }

    pub fn file_length(&mut self) -> PdbResult<u64> {
        let cur = self.stream.tell()?;
        let len = self.stream.seek_end()?;
        self.stream.seek_to(cur)?;
        Ok(len)
    }

    fn require_writable(&self, op: &str) -> PdbResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(PdbError::format(format!("file is open read-only, cannot {}", op)))
        }
    }

    /// Define a derived type from member descriptors, in both charts.
    /// First definition wins. A member may point at the type being
    /// defined; any other unknown member type is an error.
    pub fn defstr(&mut self, name: &str, members: &[&str]) -> PdbResult<Rc<Defstr>> {
        self.require_writable("define a type")?;
        let mut fmem = Vec::with_capacity(members.len());
        let mut hmem = Vec::with_capacity(members.len());
        for text in members {
            let m = parse_member(text, self.default_offset)?;
            if !self.chart.contains(&m.base_type) && !(m.base_type == name && is_indirect(&m.ty)) {
                return Err(PdbError::type_err(format!(
                    "member {:?} of {:?} has an unknown type",
                    text, name
                )));
            }
            hmem.push(parse_member(text, self.default_offset)?);
            fmem.push(m);
        }
        self.host_chart.install_struct(name, hmem)?;
        let dp = self.chart.install_struct(name, fmem)?;
        self.flushed = false;
        Ok(dp)
    }

    /// Define a primitive type that is never format converted: the same
    /// `size` bytes on disk and in host buffers.
    pub fn defncv(&mut self, name: &str, size: usize, align: usize) -> PdbResult<Rc<Defstr>> {
        self.require_writable("define a type")?;
        let d = Defstr {
            name: name.to_string(),
            size,
            size_bits: 0,
            alignment: align,
            n_indirects: 0,
            convert: false,
            unsigned: false,
            onescmp: false,
            order_flag: None,
            order: Vec::new(),
            format: None,
            members: Vec::new(),
        };
        self.host_chart.install(d.clone());
        let dp = self.chart.install(d);
        self.flushed = false;
        Ok(dp)
    }

    /// Declare that pointer member `member` of `ty` has its true type
    /// named at run time by the `char *` member `controller`.
    pub fn cast(&mut self, ty: &str, member: &str, controller: &str) -> PdbResult<()> {
        self.require_writable("register a cast")?;
        self.chart.set_cast(ty, member, controller)?;
        self.host_chart.set_cast(ty, member, controller)?;
        self.flushed = false;
        Ok(())
    }

    /// Reserve disk space for an entry without writing any data. The name
    /// may carry dimensions; naming an existing entry adds a block to it.
    /// Types with pointer members have no fixed size and are rejected.
    pub fn defent(&mut self, name: &str, ty: &str) -> PdbResult<()> {
        self.require_writable("define an entry")?;
        if is_indirect(ty) {
            return Err(PdbError::type_err("cannot reserve space for an indirect type"));
        }
        let dp = self.chart.lookup_required(ty)?;
        if dp.n_indirects > 0 {
            return Err(PdbError::type_err(format!(
                "type {:?} has pointer members and no fixed size on disk",
                ty
            )));
        }
        let fbyt = dp.size;
        let base = base_name(name);
        let dims = dims_in_name(name, self.default_offset)?;

        if self.symtab.contains(base) {
            let order = self.major_order;
            let doff = self.default_offset;
            let addr = self.chrtaddr;
            let mut staged = self.symtab.lookup(base).cloned().ok_or_else(|| {
                PdbError::UnknownVariable { name: base.to_string() }
            })?;
            let added = staged.extend_dims(&dims, order, doff)?;
            staged.add_block(addr, added);
            self.extend_file(added as i64 * fbyt as i64)?;
            self.symtab.install(base, staged);
        } else {
            let number = comp_num(&dims);
            let entry = SymbolEntry::new(ty, dims, self.chrtaddr);
            self.extend_file(number as i64 * fbyt as i64)?;
            self.symtab.install(base, entry);
        }
        self.flushed = false;
        Ok(())
    }

    /// Write an entry. For a new name the name may carry dimensions,
    /// `"a(0:9)"`; for an existing name (or a path expression into one)
    /// the addressed region is overwritten in place.
    pub fn write(&mut self, name: &str, ty: &str, src: &[u8], heap: &Heap) -> PdbResult<()> {
        self.write_as(name, ty, ty, src, heap)
    }

    /// Write an entry whose host buffer holds `intype` items, recording
    /// `outtype` in the symbol table. An existing entry keeps its
    /// recorded type.
    pub fn write_as(
        &mut self,
        name: &str,
        intype: &str,
        outtype: &str,
        src: &[u8],
        heap: &Heap,
    ) -> PdbResult<()> {
        self.require_writable("write")?;
        let name = name.trim();
        let literal = self.symtab.contains(name);

        if literal || self.symtab.contains(base_name(name)) {
            self.overwrite(name, literal, intype, src, heap)?;
        } else {
            let dims = dims_in_name(name, self.default_offset)?;
            let number = comp_num(&dims);
            check_src(&self.host_chart, src, number, intype)?;
            let addr = self.chrtaddr;

            {
                let PdbFile { stream, chart, host_chart, major_order, default_offset, .. } = self;
                let mut ctx = FileCtx {
                    stream: stream.as_mut(),
                    chart,
                    host_chart,
                    major_order: *major_order,
                    default_offset: *default_offset,
                };
                ctx.stream.seek_to(addr as u64)?;
                engine::write_entry(&mut ctx, src, number, intype, outtype, heap)?;
            }
            // install only once the data is on disk
            self.symtab
                .install(base_name(name), SymbolEntry::new(outtype, dims, addr));
            self.chrtaddr = self.stream.tell()? as i64;
        }
        self.flushed = false;
        Ok(())
    }

    fn overwrite(
        &mut self,
        name: &str,
        literal: bool,
        intype: &str,
        src: &[u8],
        heap: &Heap,
    ) -> PdbResult<()> {
        let PdbFile { stream, chart, host_chart, symtab, major_order, default_offset, .. } = self;
        let mut ctx = FileCtx {
            stream: stream.as_mut(),
            chart,
            host_chart,
            major_order: *major_order,
            default_offset: *default_offset,
        };
        let rp = pathexpr::resolve(&mut ctx, symtab, name)?;
        check_src(ctx.host_chart, src, rp.entry.number, intype)?;

        let hyper = !literal
            && trailing_index(&rp.path).is_some()
            && !rp.entry.dims.is_empty()
            && !is_indirect(&rp.entry.ty);
        if hyper {
            let expr = trailing_index(&rp.path).unwrap_or_default().to_string();
            engine::write_hyper(&mut ctx, &rp.entry, &expr, intype, src, heap)?;
        } else if rp.entry.blocks.len() > 1 && !rp.entry.dims.is_empty() {
            // scattered entry: route the whole range through the hyper
            // walker so each block lands where it lives
            let expr = full_range_expr(&rp.entry.dims);
            engine::write_hyper(&mut ctx, &rp.entry, &expr, intype, src, heap)?;
        } else {
            ctx.stream.seek_to(rp.entry.addr as u64)?;
            engine::write_entry(&mut ctx, src, rp.entry.number, intype, &rp.entry.ty, heap)?;
        }
        Ok(())
    }

    /// Append a block to an existing entry. The name carries the shape
    /// of the appended data, `"a(5:9)"`; all dimensions but the varying
    /// one must match the entry.
    pub fn append(&mut self, name: &str, src: &[u8], heap: &Heap) -> PdbResult<()> {
        self.append_as(name, None, src, heap)
    }

    pub fn append_as(
        &mut self,
        name: &str,
        intype: Option<&str>,
        src: &[u8],
        heap: &Heap,
    ) -> PdbResult<()> {
        self.require_writable("append")?;
        let base = base_name(name);
        let dims = dims_in_name(name, self.default_offset)?;

        let order = self.major_order;
        let doff = self.default_offset;
        let addr = self.chrtaddr;
        // grow a copy of the entry; the table keeps the old shape until
        // the data is on disk
        let mut staged = self
            .symtab
            .lookup(base)
            .cloned()
            .ok_or_else(|| PdbError::UnknownVariable { name: base.to_string() })?;
        let added = staged.extend_dims(&dims, order, doff)?;
        staged.add_block(addr, added);
        let ty = staged.ty.clone();

        let fbyt = self.chart.size_of(&ty)?;
        let nb = added as i64 * fbyt as i64;
        let intype = intype.unwrap_or(&ty);
        check_src(&self.host_chart, src, added, intype)?;

        {
            let PdbFile { stream, chart, host_chart, major_order, default_offset, .. } = self;
            let mut ctx = FileCtx {
                stream: stream.as_mut(),
                chart,
                host_chart,
                major_order: *major_order,
                default_offset: *default_offset,
            };
            ctx.stream.seek_to(addr as u64)?;
            engine::write_entry(&mut ctx, src, added, intype, &ty, heap)?;
        }

        self.symtab.install(base, staged);
        if (self.stream.tell()? as i64) < addr + nb {
            self.extend_file(nb)?;
        } else {
            self.chrtaddr = addr + nb;
        }
        self.flushed = false;
        Ok(())
    }

    /// Read the data a path expression addresses, as the entry's own
    /// type. Pointee data materializes into `heap`.
    pub fn read(&mut self, name: &str, heap: &mut Heap) -> PdbResult<Vec<u8>> {
        self.read_common(name, None, heap)
    }

    /// Read with conversion to an explicit host type.
    pub fn read_as(&mut self, name: &str, ty: &str, heap: &mut Heap) -> PdbResult<Vec<u8>> {
        self.read_common(name, Some(ty), heap)
    }

    fn read_common(
        &mut self,
        name: &str,
        ty: Option<&str>,
        heap: &mut Heap,
    ) -> PdbResult<Vec<u8>> {
        let literal = self.symtab.contains(name.trim());
        let PdbFile { stream, chart, host_chart, symtab, major_order, default_offset, .. } = self;
        let mut ctx = FileCtx {
            stream: stream.as_mut(),
            chart,
            host_chart,
            major_order: *major_order,
            default_offset: *default_offset,
        };
        let rp = pathexpr::resolve(&mut ctx, symtab, name)?;
        let outtype = match ty {
            Some(t) => t.to_string(),
            None => rp.outtype.clone().unwrap_or_else(|| rp.entry.ty.clone()),
        };
        let hbyt = ctx.host_chart.size_of(&outtype)?;
        let mut out = vec![0u8; rp.entry.number as usize * hbyt];

        let hyper = !literal && trailing_index(&rp.path).is_some() && !rp.entry.dims.is_empty();
        if hyper {
            let expr = trailing_index(&rp.path).unwrap_or_default().to_string();
            engine::read_hyper(&mut ctx, &rp.entry, &expr, &outtype, &mut out, heap)?;
        } else {
            engine::read_entry(&mut ctx, &rp.entry, &outtype, &mut out, heap)?;
        }
        Ok(out)
    }

    /// Move the end-of-data watermark past `nb` fresh bytes.
    fn extend_file(&mut self, nb: i64) -> PdbResult<()> {
        let addr = self.chrtaddr + nb;
        self.stream.seek_to(addr as u64)?;
        self.stream.write_all_bytes(b" ")?;
        self.chrtaddr = addr;
        Ok(())
    }

    /// Rewrite the chart, symbol table, and extras tables after the data
    /// and point the header's address line at them.
    pub fn flush(&mut self) -> PdbResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.require_writable("flush")?;
        let saved = self.stream.tell()?;
        self.stream.flush_stream()?;

        self.stream.seek_to(self.chrtaddr as u64)?;
        self.wr_chrt()?;
        self.symtaddr = self.stream.tell()? as i64;
        self.wr_symt()?;
        self.wr_extras()?;
        self.stream.flush_stream()?;

        self.stream.seek_to(self.headaddr)?;
        self.stream
            .write_str(&format!("{}\u{1}{}\u{1}\n", self.chrtaddr, self.symtaddr))?;
        self.stream.flush_stream()?;
        self.stream.seek_to(saved)?;

        log::debug!("flushed tables: chart at {}, symbols at {}", self.chrtaddr, self.symtaddr);
        self.flushed = true;
        Ok(())
    }

    /// Flush (if writable) and release the file.
    pub fn close(mut self) -> PdbResult<()> {
        if self.writable {
            self.flush()?;
        }
        self.stream.flush_stream()
    }

    fn wr_chrt(&mut self) -> PdbResult<()> {
        for d in self.chart.iter_derived() {
            let mut line = format!("{}\u{1}{}\u{1}", d.name, d.size);
            for m in &d.members {
                line.push_str(&m.member);
                line.push('\u{1}');
            }
            line.push('\n');
            self.stream.write_str(&line)?;
        }
        self.stream.write_str("\u{2}\n")
    }

    fn wr_symt(&mut self) -> PdbResult<()> {
        for (name, e) in self.symtab.iter() {
            let multi = e.blocks.len() > 1;
            let nb = if multi { e.blocks[0].number } else { e.number };
            let mut line = format!("{}\u{1}{}\u{1}{}\u{1}{}\u{1}", name, e.ty, nb, e.addr());
            let vd = e.varying_dim(self.major_order);
            for (i, d) in e.dims.iter().enumerate() {
                let mut ne = d.number();
                if multi && Some(i) == vd {
                    // record the first block's shape; the Blocks extra
                    // restores the full extent on open
                    let stride = (e.number / d.number().max(1)).max(1);
                    ne = nb / stride;
                }
                line.push_str(&format!("{}\u{1}{}\u{1}", d.index_min, ne));
            }
            line.push('\n');
            self.stream.write_str(&line)?;
        }
        self.stream.write_str("\n")
    }

    fn wr_extras(&mut self) -> PdbResult<()> {
        let a = self.chart.align;
        self.stream
            .write_str(&format!("Offset:{}\n", self.default_offset))?;
        self.stream.write_str("Alignment:")?;
        self.stream.write_all_bytes(&[
            a.char_align as u8,
            a.ptr_align as u8,
            a.short_align as u8,
            a.int_align as u8,
            a.long_align as u8,
            a.float_align as u8,
            a.double_align as u8,
        ])?;
        self.stream.write_str("\n")?;
        self.stream
            .write_str(&format!("Struct-Alignment:{}\n", a.struct_align))?;
        self.stream.write_str("Longlong-Format-Alignment:")?;
        self.stream.write_all_bytes(&[
            self.chart.std.longlong_bytes as u8,
            self.chart.std.longlong_order.code(),
            a.longlong_align as u8,
        ])?;
        self.stream.write_str("\n")?;
        self.stream
            .write_str(&format!("Version:{}|{}\n", self.system_version, self.date))?;

        self.stream.write_str("Casts:\n")?;
        for (ty, member, controller) in self.chart.casts() {
            self.stream
                .write_str(&format!("{}\u{1}{}\u{1}{}\u{1}\n", ty, member, controller))?;
        }
        self.stream.write_str("\u{2}\n")?;

        self.stream
            .write_str(&format!("Major-Order:{}\n", self.major_order.code()))?;

        self.stream.write_str("Primitive-Types:\n")?;
        let mut prims = String::new();
        for d in self.chart.iter_extra_primitives() {
            let code = match d.order_flag {
                Some(o) => o.code() as i32,
                None => -1,
            };
            prims.push_str(&format!("{}\u{1}{}\u{1}{}\u{1}{}\u{1}", d.name, d.size, d.alignment, code));
            if d.order.is_empty() {
                prims.push_str("DEFORDER\u{1}");
            } else {
                prims.push_str("ORDER\u{1}");
                for b in &d.order {
                    prims.push_str(&format!("{}\u{1}", b));
                }
            }
            match (&d.format, d.order_flag) {
                (Some(f), _) => {
                    prims.push_str(&format!(
                        "FLOAT\u{1}{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}\u{1}",
                        f.bits,
                        f.expn_bits,
                        f.mant_bits,
                        f.sign_pos,
                        f.expn_pos,
                        f.mant_pos,
                        f.guard_bit,
                        f.bias
                    ));
                }
                (None, None) => prims.push_str("NO-CONV\u{1}"),
                (None, Some(_)) => prims.push_str("FIX\u{1}"),
            }
            prims.push('\n');
        }
        self.stream.write_str(&prims)?;
        self.stream.write_str("\u{2}\n")?;

        self.stream.write_str("Blocks:\n")?;
        let mut blocks = String::new();
        for (name, e) in self.symtab.iter() {
            if e.blocks.len() < 2 {
                continue;
            }
            blocks.push_str(&format!("{}\u{1}{}", name, e.blocks.len()));
            for (i, b) in e.blocks.iter().enumerate() {
                blocks.push_str(&format!(" {} {}", b.addr, b.number));
                if (i + 1) % 50 == 0 {
                    blocks.push('\n');
                }
            }
            blocks.push('\n');
        }
        self.stream.write_str(&blocks)?;
        self.stream.write_str("\u{2}\n")?;

        self.stream.write_str("\n\n")
    }
}

impl Drop for PdbFile {
    fn drop(&mut self) {
        if self.writable && !self.flushed {
            if let Err(e) = self.flush() {
                log::warn!("flush on drop failed: {}", e);
            }
        }
    }
}

/// Write the binary format block describing a numeric standard, then
/// the ASCII bias line. The block starts with its own length so readers
/// with different float widths stay in step.
fn wr_format(stream: &mut dyn ByteStream, std: &NumericStandard) -> PdbResult<()> {
    let fb = std.float_bytes;
    let db = std.double_bytes;
    let n = 1 + 6 + 3 + fb + db + 7 + 7;

    let mut block = Vec::with_capacity(n);
    block.push(n as u8);
    block.extend([
        std.ptr_bytes as u8,
        std.short_bytes as u8,
        std.int_bytes as u8,
        std.long_bytes as u8,
        fb as u8,
        db as u8,
    ]);
    block.extend([std.short_order.code(), std.int_order.code(), std.long_order.code()]);
    block.extend(&std.float_order);
    block.extend(&std.double_order);
    push_format(&mut block, &std.float_format);
    push_format(&mut block, &std.double_format);
    stream.write_all_bytes(&block)?;

    stream.write_str(&format!(
        "{}\u{1}{}\u{1}\n",
        std.float_format.bias, std.double_format.bias
    ))
}

fn push_format(block: &mut Vec<u8>, f: &FloatFormat) {
    block.extend([
        f.bits as u8,
        f.expn_bits as u8,
        f.mant_bits as u8,
        f.sign_pos as u8,
        f.expn_pos as u8,
        f.mant_pos as u8,
        f.guard_bit as u8,
    ]);
}

fn rd_format(stream: &mut dyn ByteStream) -> PdbResult<NumericStandard> {
    let mut len = [0u8; 1];
    stream.read_exact_bytes(&mut len)?;
    let n = len[0] as usize;
    if n < 2 {
        return Err(PdbError::format("format block is too short"));
    }
    let mut b = vec![0u8; n - 1];
    stream.read_exact_bytes(&mut b)?;

    if b.len() < 9 {
        return Err(PdbError::format("format block is truncated"));
    }
    let ptr_bytes = b[0] as usize;
    let short_bytes = b[1] as usize;
    let int_bytes = b[2] as usize;
    let long_bytes = b[3] as usize;
    let float_bytes = b[4] as usize;
    let double_bytes = b[5] as usize;
    let order = |c: u8| {
        ByteOrder::from_code(c)
            .ok_or_else(|| PdbError::format(format!("unknown byte order code {}", c)))
    };
    let short_order = order(b[6])?;
    let int_order = order(b[7])?;
    let long_order = order(b[8])?;

    if b.len() != 9 + float_bytes + double_bytes + 14 {
        return Err(PdbError::format("format block length disagrees with its sizes"));
    }
    let mut i = 9;
    let float_order = b[i..i + float_bytes].to_vec();
    i += float_bytes;
    let double_order = b[i..i + double_bytes].to_vec();
    i += double_bytes;
    let mut float_format = format_from(&b[i..i + 7]);
    i += 7;
    let mut double_format = format_from(&b[i..i + 7]);

    let bias_line = stream.require_line("float bias line")?;
    let mut fields = bias_line.split('\u{1}');
    float_format.bias = parse_i64(fields.next().unwrap_or(""), "float bias")?;
    double_format.bias = parse_i64(fields.next().unwrap_or(""), "double bias")?;

    Ok(NumericStandard {
        ptr_bytes,
        short_bytes,
        short_order,
        int_bytes,
        int_order,
        long_bytes,
        long_order,
        // refined by the extras table when present
        longlong_bytes: long_bytes,
        longlong_order: long_order,
        float_bytes,
        float_format,
        float_order,
        double_bytes,
        double_format,
        double_order,
    })
}

fn format_from(b: &[u8]) -> FloatFormat {
    FloatFormat {
        bits: b[0] as u32,
        expn_bits: b[1] as u32,
        mant_bits: b[2] as u32,
        sign_pos: b[3] as u32,
        expn_pos: b[4] as u32,
        mant_pos: b[5] as u32,
        guard_bit: b[6] as u32,
        bias: 0,
    }
}

fn rd_symt(stream: &mut dyn ByteStream) -> PdbResult<SymbolTable> {
    let mut table = SymbolTable::new();
    loop {
        let line = stream.require_line("symbol table")?;
        if line.is_empty() {
            break;
        }
        let f: Vec<&str> = line.split('\u{1}').collect();
        if f.len() < 4 {
            return Err(PdbError::format(format!("malformed symbol record {:?}", line)));
        }
        let number: u64 = parse_i64(f[2], "item count")? as u64;
        let addr = parse_i64(f[3], "entry address")?;
        let mut dims = Vec::new();
        let mut i = 4;
        while i + 1 < f.len() && !f[i].is_empty() {
            let min = parse_i64(f[i], "dimension minimum")?;
            let extent = parse_i64(f[i + 1], "dimension extent")?;
            dims.push(Dimension::new(min, min + extent - 1));
            i += 2;
        }
        let entry = SymbolEntry {
            ty: f[1].to_string(),
            dims,
            number,
            blocks: vec![SymBlock { addr, number }],
        };
        table.install(f[0], entry);
    }
    Ok(table)
}

fn rd_chrt(
    stream: &mut dyn ByteStream,
    chart: &mut Chart,
    host_chart: &mut Chart,
    default_offset: i64,
) -> PdbResult<()> {
    loop {
        let line = stream.require_line("structure chart")?;
        if line == "\u{2}" {
            break;
        }
        let f: Vec<&str> = line.split('\u{1}').collect();
        if f.len() < 3 {
            return Err(PdbError::format(format!("malformed chart record {:?}", line)));
        }
        let name = f[0];
        let mut fmem = Vec::new();
        let mut hmem = Vec::new();
        for text in f[2..].iter().filter(|t| !t.is_empty()) {
            fmem.push(parse_member(text, default_offset)?);
            hmem.push(parse_member(text, default_offset)?);
        }
        chart.install_struct(name, fmem)?;
        host_chart.install_struct(name, hmem)?;
    }
    Ok(())
}

/// One primitive type carried in the extras table.
struct PrimExtra {
    name: String,
    size: usize,
    align: usize,
    order_flag: i32,
    order: Vec<u8>,
    format: Option<FloatFormat>,
    no_conv: bool,
}

#[derive(Default)]
struct Extras {
    default_offset: i64,
    align: Option<Alignment>,
    struct_align: Option<usize>,
    /// (bytes, order code, alignment)
    longlong: Option<(usize, u8, usize)>,
    version: (u32, String),
    casts: Vec<(String, String, String)>,
    major_order: Option<MajorOrder>,
    primitives: Vec<PrimExtra>,
    blocks: Vec<(String, Vec<SymBlock>)>,
}

fn rd_extras(stream: &mut dyn ByteStream) -> PdbResult<Extras> {
    let mut ex = Extras::default();
    loop {
        let raw = match stream.read_line()? {
            Some(l) => l,
            None => break,
        };
        if raw.is_empty() {
            break;
        }
        let pos = match raw.iter().position(|&b| b == b':') {
            Some(p) => p,
            None => continue,
        };
        let key = String::from_utf8_lossy(&raw[..pos]).to_string();
        let val = &raw[pos + 1..];
        match key.as_str() {
            "Offset" => {
                ex.default_offset = parse_i64(&String::from_utf8_lossy(val), "default offset")?;
            }
            "Alignment" => {
                if val.len() >= 7 {
                    ex.align = Some(Alignment {
                        char_align: val[0] as usize,
                        ptr_align: val[1] as usize,
                        short_align: val[2] as usize,
                        int_align: val[3] as usize,
                        long_align: val[4] as usize,
                        longlong_align: val[4] as usize,
                        float_align: val[5] as usize,
                        double_align: val[6] as usize,
                        struct_align: 0,
                    });
                }
            }
            "Struct-Alignment" => {
                ex.struct_align =
                    Some(parse_i64(&String::from_utf8_lossy(val), "struct alignment")? as usize);
            }
            "Longlong-Format-Alignment" => {
                if val.len() >= 3 {
                    ex.longlong = Some((val[0] as usize, val[1], val[2] as usize));
                }
            }
            "Version" => {
                let text = String::from_utf8_lossy(val).to_string();
                let (v, date) = text.split_once('|').unwrap_or((text.as_str(), ""));
                ex.version = (v.trim().parse().unwrap_or(0), date.to_string());
            }
            "Major-Order" => {
                let code = parse_i64(&String::from_utf8_lossy(val), "major order")? as u32;
                ex.major_order = MajorOrder::from_code(code);
            }
            "Casts" => rd_cast_extras(stream, &mut ex)?,
            "Primitive-Types" => rd_prim_extras(stream, &mut ex)?,
            "Blocks" => rd_block_extras(stream, &mut ex)?,
            // unrecognized keys (directories, file families...) skip
            _ => {}
        }
    }
    Ok(ex)
}

fn rd_cast_extras(stream: &mut dyn ByteStream, ex: &mut Extras) -> PdbResult<()> {
    loop {
        let line = stream.require_line("cast list")?;
        if line == "\u{2}" {
            break;
        }
        let f: Vec<&str> = line.split('\u{1}').collect();
        if f.len() < 3 {
            return Err(PdbError::format(format!("malformed cast record {:?}", line)));
        }
        ex.casts.push((f[0].to_string(), f[1].to_string(), f[2].to_string()));
    }
    Ok(())
}

fn rd_prim_extras(stream: &mut dyn ByteStream, ex: &mut Extras) -> PdbResult<()> {
    loop {
        let line = stream.require_line("primitive type list")?;
        if line == "\u{2}" {
            break;
        }
        let f: Vec<&str> = line.split('\u{1}').collect();
        if f.len() < 6 {
            return Err(PdbError::format(format!("malformed primitive record {:?}", line)));
        }
        let size = parse_i64(f[1], "primitive size")? as usize;
        let mut i = 4;
        let mut order = Vec::new();
        match f[i] {
            "ORDER" => {
                i += 1;
                for _ in 0..size {
                    if i >= f.len() {
                        return Err(PdbError::format("primitive byte order list is truncated"));
                    }
                    order.push(parse_i64(f[i], "byte position")? as u8);
                    i += 1;
                }
            }
            _ => i += 1, // DEFORDER
        }
        let mut format = None;
        let mut no_conv = false;
        match f.get(i).copied().unwrap_or("") {
            "FLOAT" => {
                if i + 8 >= f.len() {
                    return Err(PdbError::format("primitive float format is truncated"));
                }
                format = Some(FloatFormat {
                    bits: parse_i64(f[i + 1], "float bits")? as u32,
                    expn_bits: parse_i64(f[i + 2], "exponent bits")? as u32,
                    mant_bits: parse_i64(f[i + 3], "mantissa bits")? as u32,
                    sign_pos: parse_i64(f[i + 4], "sign position")? as u32,
                    expn_pos: parse_i64(f[i + 5], "exponent position")? as u32,
                    mant_pos: parse_i64(f[i + 6], "mantissa position")? as u32,
                    guard_bit: parse_i64(f[i + 7], "guard bit")? as u32,
                    bias: parse_i64(f[i + 8], "bias")?,
                });
            }
            "NO-CONV" => no_conv = true,
            _ => {} // FIX
        }
        ex.primitives.push(PrimExtra {
            name: f[0].to_string(),
            size,
            align: parse_i64(f[2], "primitive alignment")? as usize,
            order_flag: parse_i64(f[3], "order flag")? as i32,
            order,
            format,
            no_conv,
        });
    }
    Ok(())
}

fn rd_block_extras(stream: &mut dyn ByteStream, ex: &mut Extras) -> PdbResult<()> {
    loop {
        let line = stream.require_line("block list")?;
        if line == "\u{2}" {
            break;
        }
        let (name, rest) = line
            .split_once('\u{1}')
            .ok_or_else(|| PdbError::format(format!("malformed block record {:?}", line)))?;
        let mut vals: Vec<i64> = Vec::new();
        for t in rest.split_whitespace() {
            vals.push(parse_i64(t, "block value")?);
        }
        if vals.is_empty() {
            return Err(PdbError::format(format!("empty block record for {:?}", name)));
        }
        let n = vals[0] as usize;
        // long block lists wrap onto continuation lines
        while vals.len() < 1 + 2 * n {
            let more = stream.require_line("block list")?;
            if more.is_empty() || more == "\u{2}" {
                return Err(PdbError::format(format!(
                    "block record for {:?} is truncated",
                    name
                )));
            }
            for t in more.split_whitespace() {
                vals.push(parse_i64(t, "block value")?);
            }
        }
        let blocks = vals[1..]
            .chunks(2)
            .take(n)
            .map(|c| SymBlock { addr: c[0], number: c[1] as u64 })
            .collect();
        ex.blocks.push((name.to_string(), blocks));
    }
    Ok(())
}

fn install_prim_extras(chart: &mut Chart, host_chart: &mut Chart, prims: &[PrimExtra]) {
    for p in prims {
        let d = Defstr {
            name: p.name.clone(),
            size: p.size,
            size_bits: 0,
            alignment: p.align,
            n_indirects: 0,
            convert: !p.no_conv,
            unsigned: false,
            onescmp: false,
            order_flag: if p.order_flag < 0 { None } else { ByteOrder::from_code(p.order_flag as u8) },
            order: p.order.clone(),
            format: p.format,
            members: Vec::new(),
        };
        let mut h = d.clone();
        h.convert = false;
        chart.install(d);
        host_chart.install(h);
    }
}

/// Restore multi-block entries: reattach the block list and grow the
/// varying dimension back to the full extent.
fn apply_block_extras(
    symtab: &mut SymbolTable,
    blocks: &[(String, Vec<SymBlock>)],
    order: MajorOrder,
) {
    for (name, bl) in blocks {
        let e = match symtab.lookup_mut(name) {
            Some(e) => e,
            None => continue,
        };
        let total: u64 = bl.iter().map(|b| b.number).sum();
        if let Some(vd) = e.varying_dim(order) {
            let dn = e.dims[vd].number().max(1);
            let stride = (e.number / dn).max(1);
            let extent = (total / stride) as i64;
            e.dims[vd].index_max = e.dims[vd].index_min + extent - 1;
        }
        e.number = total;
        e.blocks = bl.clone();
    }
}

/// The part of a name before any member, dimension, or space decoration.
fn base_name(name: &str) -> &str {
    let name = name.trim();
    match name.find(|c| ".([ ".contains(c)) {
        Some(i) => &name[..i],
        None => name,
    }
}

/// Dimensions carried in a name, `"a(0:9,3)"`. An undecorated name has
/// none.
fn dims_in_name(name: &str, default_offset: i64) -> PdbResult<Vec<Dimension>> {
    let open = match name.find(['(', '[']) {
        Some(i) => i,
        None => return Ok(Vec::new()),
    };
    let close = if name.as_bytes()[open] == b'(' { ')' } else { ']' };
    let inner = &name[open + 1..];
    let end = inner
        .find(close)
        .ok_or_else(|| PdbError::syntax(name, "unterminated dimension list"))?;
    parse_dimensions(&inner[..end], default_offset)
}

/// The final index expression of a resolved path, if it ends with one.
fn trailing_index(path: &str) -> Option<&str> {
    let last = path.chars().last()?;
    if last != ')' && last != ']' {
        return None;
    }
    let open = path.rfind(['(', '['])?;
    Some(&path[open + 1..path.len() - 1])
}

/// An index expression selecting every element of a shape.
fn full_range_expr(dims: &[Dimension]) -> String {
    dims.iter()
        .map(|d| format!("{}:{}", d.index_min, d.index_max))
        .collect::<Vec<_>>()
        .join(",")
}

fn check_src(host_chart: &Chart, src: &[u8], number: u64, intype: &str) -> PdbResult<()> {
    let need = number as usize * host_chart.size_of(intype)?;
    if src.len() < need {
        return Err(PdbError::DimensionMismatch {
            reason: format!(
                "buffer holds {} bytes, {} items of {} need {}",
                src.len(),
                number,
                intype,
                need
            ),
        });
    }
    Ok(())
}

fn parse_i64(s: &str, what: &str) -> PdbResult<i64> {
    s.trim()
        .parse()
        .map_err(|_| PdbError::format(format!("bad {} {:?}", what, s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::read_handle;

    fn doubles(vals: &[f64]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn as_doubles(bytes: &[u8]) -> Vec<f64> {
        bytes
            .chunks(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn create_writes_the_header_and_format_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "h.pdb");
        PdbFile::create(&path).unwrap().close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"!<<PDB:II>>!\n"));
        // format block: length byte first, host floats are 4 and 8 bytes
        let n = bytes[13] as usize;
        assert_eq!(n, 1 + 6 + 3 + 4 + 8 + 7 + 7);
        // bias line for IEEE singles and doubles
        let tail = &bytes[13 + n..];
        assert!(tail.starts_with(format!("{}\u{1}{}\u{1}\n", 0x7f, 0x3ff).as_bytes()));
    }

    #[test]
    fn scalars_round_trip_through_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "s.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        f.write("pi", "double", &doubles(&[3.25]), &heap).unwrap();
        f.write("count", "long", &42i64.to_le_bytes(), &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("pi", &mut heap).unwrap()), [3.25]);
        let c = f.read("count", &mut heap).unwrap();
        assert_eq!(i64::from_le_bytes(c.try_into().unwrap()), 42);
    }

    #[test]
    fn dimensioned_names_define_the_entry_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "d.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        let vals: Vec<f64> = (0..12).map(f64::from).collect();
        f.write("grid(2:4,0:3)", "double", &doubles(&vals), &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let e = f.inquire_entry("grid").unwrap();
        assert_eq!(e.ty, "double");
        assert_eq!(e.dims, vec![Dimension::new(2, 4), Dimension::new(0, 3)]);
        assert_eq!(e.number, 12);
        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("grid", &mut heap).unwrap()), vals);
    }

    #[test]
    fn hyper_indexes_select_part_of_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "hy.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        let vals: Vec<f64> = (0..10).map(f64::from).collect();
        f.write("a(10)", "double", &doubles(&vals), &heap).unwrap();

        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("a[2:4]", &mut heap).unwrap()), [2.0, 3.0, 4.0]);
        assert_eq!(as_doubles(&f.read("a[1:9:4]", &mut heap).unwrap()), [1.0, 5.0, 9.0]);
        assert_eq!(as_doubles(&f.read("a[7]", &mut heap).unwrap()), [7.0]);

        // and writes through the same path land in place
        f.write("a[2:4]", "double", &doubles(&[-2.0, -3.0, -4.0]), &heap).unwrap();
        let back = as_doubles(&f.read("a", &mut heap).unwrap());
        assert_eq!(back[1..5], [1.0, -2.0, -3.0, -4.0]);
        f.close().unwrap();
    }

    #[test]
    fn derived_types_and_member_paths_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "t.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        f.defstr("sample", &["char tag", "double value", "long id"]).unwrap();
        let d = f.host_chart().lookup("sample").unwrap();
        let mut buf = vec![0u8; d.size];
        buf[0] = b'x';
        buf[8..16].copy_from_slice(&7.5f64.to_le_bytes());
        buf[16..24].copy_from_slice(&9i64.to_le_bytes());
        f.write("s", "sample", &buf, &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let dp = f.inquire_type("sample").unwrap();
        assert_eq!(dp.members.len(), 3);
        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("s.value", &mut heap).unwrap()), [7.5]);
        let id = f.read("s.id", &mut heap).unwrap();
        assert_eq!(i64::from_le_bytes(id.try_into().unwrap()), 9);
    }

    #[test]
    fn appends_add_blocks_and_grow_the_varying_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "a.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        f.write("t(0:4)", "double", &doubles(&[0.0, 1.0, 2.0, 3.0, 4.0]), &heap).unwrap();
        f.write("gap", "long", &1i64.to_le_bytes(), &heap).unwrap();
        f.append("t(5:9)", &doubles(&[5.0, 6.0, 7.0, 8.0, 9.0]), &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let e = f.inquire_entry("t").unwrap();
        assert_eq!(e.dims, vec![Dimension::new(0, 9)]);
        assert_eq!(e.number, 10);
        assert_eq!(e.blocks.len(), 2);
        let mut heap = Heap::new();
        let all = as_doubles(&f.read("t", &mut heap).unwrap());
        assert_eq!(all, (0..10).map(f64::from).collect::<Vec<_>>());
        // a slab spanning the block boundary
        assert_eq!(as_doubles(&f.read("t[3:6]", &mut heap).unwrap()), [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn pointer_entries_round_trip_through_the_heap() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "p.pdb");

        let mut heap = Heap::new();
        let h = heap.alloc_from(&doubles(&[1.5, 2.5, 3.5]));
        let mut src = vec![0u8; 8];
        crate::heap::write_handle(&mut src, 0, h).unwrap();

        let mut f = PdbFile::create(&path).unwrap();
        f.write("p", "double *", &src, &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let mut heap = Heap::new();
        let out = f.read("p", &mut heap).unwrap();
        let h = read_handle(&out, 0).unwrap();
        assert_eq!(as_doubles(heap.get(h).unwrap()), [1.5, 2.5, 3.5]);
        // the pointee is addressable directly too
        assert_eq!(as_doubles(&f.read("*p", &mut heap).unwrap()), [1.5]);
        assert_eq!(as_doubles(&f.read("p[2]", &mut heap).unwrap()), [3.5]);
    }

    #[test]
    fn casts_and_order_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "c.pdb");

        let mut f = PdbFile::create(&path).unwrap();
        f.set_major_order(MajorOrder::Column);
        f.set_default_offset(1);
        f.defstr("box", &["char *kind", "char *payload", "long n"]).unwrap();
        f.cast("box", "payload", "kind").unwrap();
        f.close().unwrap();

        let f = PdbFile::open_read(&path).unwrap();
        assert_eq!(f.major_order(), MajorOrder::Column);
        assert_eq!(f.default_offset(), 1);
        assert_eq!(
            f.chart().casts(),
            vec![("box".to_string(), "payload".to_string(), "kind".to_string())]
        );
    }

    #[test]
    fn target_standards_convert_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "cray.pdb");
        let heap = Heap::new();

        let mut f =
            PdbFile::create_target(&path, NumericStandard::cray(), Alignment::UNICOS).unwrap();
        f.write("v(4)", "double", &doubles(&[1.0, -2.5, 0.0, 1024.0]), &heap).unwrap();
        f.write("n", "long", &(-7i64).to_le_bytes(), &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        assert_eq!(f.chart().std, NumericStandard::cray());
        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("v", &mut heap).unwrap()), [1.0, -2.5, 0.0, 1024.0]);
        let n = f.read("n", &mut heap).unwrap();
        assert_eq!(i64::from_le_bytes(n.try_into().unwrap()), -7);
    }

    #[test]
    fn defent_reserves_space_for_a_later_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "e.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        f.defent("z(4)", "double").unwrap();
        f.write("after", "long", &5i64.to_le_bytes(), &heap).unwrap();
        // fill the reservation with disjoint indexed writes
        f.write("z[0:1]", "double", &doubles(&[9.0, 8.0]), &heap).unwrap();
        f.write("z[2:3]", "double", &doubles(&[7.0, 6.0]), &heap).unwrap();
        assert!(f.defent("w", "double *").is_err());
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        let mut heap = Heap::new();
        assert_eq!(as_doubles(&f.read("z", &mut heap).unwrap()), [9.0, 8.0, 7.0, 6.0]);
        assert!(f.defent("w", "double *").is_err());
    }

    #[test]
    fn read_only_files_reject_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "r.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        f.write("x", "double", &doubles(&[1.0]), &heap).unwrap();
        f.close().unwrap();

        let mut f = PdbFile::open_read(&path).unwrap();
        assert!(f.write("y", "double", &doubles(&[2.0]), &heap).is_err());
        assert!(f.defstr("t", &["double a"]).is_err());
        let mut heap = Heap::new();
        assert!(matches!(
            f.read("missing", &mut heap),
            Err(PdbError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn short_buffers_are_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "sb.pdb");
        let heap = Heap::new();

        let mut f = PdbFile::create(&path).unwrap();
        let err = f.write("a(10)", "double", &doubles(&[1.0, 2.0]), &heap);
        assert!(matches!(err, Err(PdbError::DimensionMismatch { .. })));
    }

    #[test]
    fn legacy_headers_select_a_machine_profile() {
        // a minimal pre-format-block file: profile code 2 (x86), one
        // 4 byte int entry at address 64, empty chart at 100, symbol
        // table at 120
        let mut buf = vec![0u8; 160];
        let header = b"!<><PDB><>! 2\n";
        buf[..header.len()].copy_from_slice(header);
        let addr_line = format!("100\u{1}120\u{1}\n");
        buf[14..14 + addr_line.len()].copy_from_slice(addr_line.as_bytes());
        buf[64..68].copy_from_slice(&7i32.to_le_bytes());
        buf[100] = 2;
        buf[101] = b'\n';
        let symt = format!("n\u{1}int\u{1}1\u{1}64\u{1}\n\n");
        buf.truncate(120);
        buf.extend_from_slice(symt.as_bytes());

        let mut f =
            PdbFile::open_on(Box::new(crate::stream::MemStream::from_bytes(buf)), false).unwrap();
        assert_eq!(f.chart().std, NumericStandard::intel_a());
        let mut heap = Heap::new();
        let out = f.read_as("n", "int", &mut heap).unwrap();
        assert_eq!(i32::from_le_bytes(out.try_into().unwrap()), 7);
    }

    #[test]
    fn garbage_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "g.pdb");
        std::fs::write(&path, b"not a data file\nat all\n").unwrap();
        assert!(PdbFile::open_read(&path).is_err());
    }
}
