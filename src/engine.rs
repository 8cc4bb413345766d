//! Recursive read and write engine
//!
//! Moves entry data between host buffers and the stream, following
//! pointers through itags. An itag is a one-line tag written ahead of
//! every pointee: item count, type, address, and an original/copy flag.
//! Readers rebuild the pointer graph from itags into heap blocks; writers
//! walk host buffers and emit an itag plus data for every distinct block,
//! and a back-referencing itag for every block they have already written.
//!
//! Both engines run an explicit work list instead of recursing, so a long
//! linked list in the data costs heap, not stack. Tasks are pushed in
//! reverse so the list behaves as a continuation stack: pointee data
//! always lands directly after its itag, depth first, which is the order
//! the reader expects.

use rustc_hash::FxHashMap;

use crate::chart::{base_type, deref_type, is_indirect, Chart, Dimension};
use crate::convert;
use crate::error::{PdbError, PdbResult};
use crate::heap::{read_handle, write_handle, Heap, HeapHandle};
use crate::standard::MajorOrder;
use crate::stream::ByteStream;
use crate::symtab::{SymbolEntry, SymBlock};

/// Host pointer fields hold an 8-byte heap handle.
const HANDLE_BYTES: usize = 8;

/// Everything the engine needs from an open file.
pub struct FileCtx<'a> {
    pub stream: &'a mut dyn ByteStream,
    /// File-side chart
    pub chart: &'a Chart,
    pub host_chart: &'a Chart,
    pub major_order: MajorOrder,
    pub default_offset: i64,
}

/// Location of indirect data reached through a path expression: the
/// address of the itag region and how many itag trees to skip to reach
/// the target array element.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndirInfo {
    pub addr: i64,
    pub n_ind_type: i64,
    pub arr_offs: i64,
}

/// A resolved data target: either a symbol table entry as written, or
/// the reduction of a path expression over one.
#[derive(Clone, Debug)]
pub struct EffectiveEntry {
    pub ty: String,
    pub number: u64,
    pub addr: i64,
    pub dims: Vec<Dimension>,
    pub blocks: Vec<SymBlock>,
    pub indir: IndirInfo,
}

impl EffectiveEntry {
    pub fn from_entry(e: &SymbolEntry) -> EffectiveEntry {
        EffectiveEntry {
            ty: e.ty.clone(),
            number: e.number,
            addr: e.addr(),
            dims: e.dims.clone(),
            blocks: e.blocks.clone(),
            indir: IndirInfo::default(),
        }
    }
}

/// One pointee tag on the stream.
#[derive(Clone, Debug)]
pub struct Itag {
    pub nitems: u64,
    pub ty: String,
    pub addr: i64,
    /// True when the data follows this tag; false when `addr` locates the
    /// tag it was first written under.
    pub flag: bool,
}

pub fn write_itag(
    stream: &mut dyn ByteStream,
    nitems: u64,
    ty: &str,
    addr: i64,
    flag: bool,
) -> PdbResult<()> {
    stream.write_str(&format!(
        "{}\u{1}{}\u{1}{}\u{1}{}\u{1}\n",
        nitems, ty, addr, flag as i32
    ))
}

/// Read one itag line. Older writers may drop the address or flag
/// fields; a missing address means a null pointer.
pub fn read_itag(stream: &mut dyn ByteStream) -> PdbResult<Itag> {
    let line = stream.require_line("pointer tag")?;
    let toks: Vec<&str> = line.split('\u{1}').map(|t| t.trim()).collect();

    let nitems: u64 = toks
        .first()
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| PdbError::format(format!("bad item count in pointer tag {:?}", line)))?;
    let ty = toks
        .get(1)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PdbError::format(format!("missing type in pointer tag {:?}", line)))?
        .to_string();

    let (addr, mut flag) = match toks.get(2).filter(|t| !t.is_empty()) {
        Some(t) => {
            let a: i64 = t
                .parse()
                .map_err(|_| PdbError::format(format!("bad address in pointer tag {:?}", line)))?;
            (a, true)
        }
        None => (-1, true),
    };
    if let Some(t) = toks.get(3).filter(|t| !t.is_empty()) {
        flag = t.parse::<i64>().unwrap_or(1) != 0;
    }

    Ok(Itag { nitems, ty, addr, flag })
}

/// Direct pointer members of a type.
fn num_indirects(chart: &Chart, ty: &str) -> i64 {
    if let Some(d) = chart.lookup(base_type(ty)) {
        d.n_indirects as i64
    } else {
        0
    }
}

/// Skip `skip` itag trees at the current position, leaving the stream on
/// the tag after the last one. With `noind` the pointees hanging off each
/// tree are not counted as additional units.
pub fn skip_over(ctx: &mut FileCtx, mut skip: i64, noind: bool) -> PdbResult<u64> {
    while skip > 0 {
        skip -= 1;
        let itag = read_itag(ctx.stream)?;
        let indir = is_indirect(&itag.ty);

        if !noind {
            if indir {
                skip += itag.nitems as i64;
            }
            skip += itag.nitems as i64 * num_indirects(ctx.host_chart, &itag.ty);
        }

        // null pointers and back references have no data here;
        // layered indirects carry only further tags, counted above
        if itag.addr != -1 && itag.nitems != 0 && itag.flag && !indir {
            let bpi = ctx.chart.size_of(&itag.ty)? as u64;
            let pos = ctx.stream.tell()?;
            ctx.stream.seek_to(pos + itag.nitems * bpi)?;
        }
    }
    ctx.stream.tell()
}

/// Actual disk address and items remaining in-block, given an address
/// computed as if the entry were one contiguous run starting at its
/// first block.
pub fn effective_addr(addr: i64, bpi: i64, blocks: &[SymBlock]) -> (i64, i64) {
    if blocks.is_empty() {
        return (addr, 0);
    }
    let mut off = addr - blocks[0].addr;
    for b in blocks {
        let nb = b.number as i64 * bpi;
        if nb <= 0 {
            break;
        }
        if off < nb {
            return (b.addr + off, (nb - off) / bpi);
        }
        off -= nb;
    }
    (addr, 0)
}

/// Where a host-side item lives during an operation.
#[derive(Clone, Copy, Debug)]
enum Space {
    /// The caller's buffer
    Root,
    Block(HeapHandle),
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    space: Space,
    offset: usize,
}

impl Slot {
    fn root(offset: usize) -> Slot {
        Slot { space: Space::Root, offset }
    }

    fn at(self, delta: usize) -> Slot {
        Slot { space: self.space, offset: self.offset + delta }
    }
}

fn slot_ref<'x>(root: &'x [u8], heap: &'x Heap, slot: Slot, len: usize) -> PdbResult<&'x [u8]> {
    let buf = match slot.space {
        Space::Root => root,
        Space::Block(h) => heap.get(h)?,
    };
    buf.get(slot.offset..slot.offset + len).ok_or_else(|| PdbError::Allocation {
        reason: format!("{} bytes at offset {} overrun a host buffer", len, slot.offset),
    })
}

fn slot_mut<'x>(
    root: &'x mut [u8],
    heap: &'x mut Heap,
    slot: Slot,
    len: usize,
) -> PdbResult<&'x mut [u8]> {
    let buf: &mut [u8] = match slot.space {
        Space::Root => root,
        Space::Block(h) => heap.get_mut(h)?.as_mut_slice(),
    };
    let blen = buf.len();
    buf.get_mut(slot.offset..slot.offset + len).ok_or_else(|| PdbError::Allocation {
        reason: format!(
            "{} bytes at offset {} overrun a {}-byte host buffer",
            len, slot.offset, blen
        ),
    })
}

enum RdTask {
    Seek { addr: i64 },
    Leaf { seek: Option<i64>, nitems: u64, intype: String, outtype: String, dest: Slot },
    Pointer { slot: Slot },
    Restore { addr: u64 },
}

/// Read an entry into `out` as `outtype`, materializing pointee data
/// into `heap`. Returns the number of items read.
///
/// Back-referencing itags are resolved through a per-operation alias
/// map, so pointers that shared a block when written share one again.
pub fn read_entry(
    ctx: &mut FileCtx,
    ep: &EffectiveEntry,
    outtype: &str,
    out: &mut [u8],
    heap: &mut Heap,
) -> PdbResult<u64> {
    log::trace!("read {} items of {} as {}", ep.number, ep.ty, outtype);

    let blocks: Vec<SymBlock> = if ep.blocks.len() > 1 {
        ep.blocks.clone()
    } else {
        vec![SymBlock { addr: ep.addr, number: ep.number }]
    };
    let hbyt = ctx.host_chart.size_of(outtype)?;
    let indirect = is_indirect(&ep.ty);

    let mut tasks: Vec<RdTask> = Vec::new();
    let mut out_offs = 0usize;
    let mut queued: Vec<RdTask> = Vec::new();
    let mut total = 0u64;
    for b in &blocks {
        if indirect {
            queued.push(RdTask::Seek { addr: b.addr });
            for i in 0..b.number as usize {
                queued.push(RdTask::Pointer {
                    slot: Slot::root(out_offs + i * HANDLE_BYTES),
                });
            }
        } else {
            queued.push(RdTask::Leaf {
                seek: Some(b.addr),
                nitems: b.number,
                intype: ep.ty.clone(),
                outtype: outtype.to_string(),
                dest: Slot::root(out_offs),
            });
        }
        out_offs += b.number as usize * hbyt;
        total += b.number;
    }
    for t in queued.into_iter().rev() {
        tasks.push(t);
    }

    let mut aliases: FxHashMap<i64, HeapHandle> = FxHashMap::default();
    let mut pending = (ep.indir.addr > 0).then_some(ep.indir);

    while let Some(task) = tasks.pop() {
        match task {
            RdTask::Seek { addr } => {
                let byte_addr = if addr < 0 { (-addr) >> 3 } else { addr };
                ctx.stream.seek_to(byte_addr as u64)?;
            }
            RdTask::Restore { addr } => {
                ctx.stream.seek_to(addr)?;
            }
            RdTask::Leaf { seek, nitems, intype, outtype, dest } => {
                read_leaf(ctx, &mut tasks, seek, nitems, &intype, &outtype, dest, out, heap)?;
            }
            RdTask::Pointer { slot } => {
                if let Some(il) = pending.take() {
                    ctx.stream.seek_to(il.addr as u64)?;
                    skip_over(ctx, il.n_ind_type * il.arr_offs, true)?;
                }
                read_pointer(ctx, &mut tasks, slot, out, heap, &mut aliases)?;
            }
        }
    }

    Ok(total)
}

/// Leaf pass of the read engine: move the direct bytes of `nitems`, then
/// queue one pointer read per indirect member slot.
#[allow(clippy::too_many_arguments)]
fn read_leaf(
    ctx: &mut FileCtx,
    tasks: &mut Vec<RdTask>,
    seek: Option<i64>,
    nitems: u64,
    intype: &str,
    outtype: &str,
    dest: Slot,
    out: &mut [u8],
    heap: &mut Heap,
) -> PdbResult<()> {
    let mut boffs = 0usize;
    if let Some(a) = seek {
        if a < 0 {
            // bit address
            let ea = (-a) >> 3;
            boffs = ((-a) - (ea << 3)) as usize;
            ctx.stream.seek_to(ea as u64)?;
        } else {
            ctx.stream.seek_to(a as u64)?;
        }
    }

    let dpf = ctx.chart.lookup_required(intype)?;
    let dph = ctx.host_chart.lookup_required(outtype)?;
    let n = nitems as usize;
    let hbyt = dph.size;

    if dpf.convert || intype != outtype {
        if dpf.size_bits > 0 {
            let nbytes = (nitems * dpf.size_bits + boffs as u64 + 7) / 8;
            let nia = (nbytes as usize + dpf.size - 1) / dpf.size.max(1);
            let mut buf = vec![0u8; nia * dpf.size];
            ctx.stream.read_exact_bytes(&mut buf)?;
            let d = slot_mut(out, heap, dest, n * hbyt)?;
            convert::unpack_bits(d, &buf, n, dpf.size_bits as usize, boffs, &dph);
        } else {
            let mut buf = vec![0u8; n * dpf.size];
            ctx.stream.read_exact_bytes(&mut buf)?;
            let d = slot_mut(out, heap, dest, n * hbyt)?;
            let (mut so, mut doo) = (0usize, 0usize);
            convert::convert(
                ctx.host_chart,
                ctx.chart,
                outtype,
                intype,
                nitems,
                &buf,
                &mut so,
                d,
                &mut doo,
            )?;
        }
    } else {
        let d = slot_mut(out, heap, dest, n * hbyt)?;
        ctx.stream.read_exact_bytes(d)?;
    }

    if dph.n_indirects > 0 {
        for i in (0..n).rev() {
            for m in dph.members.iter().rev() {
                if !is_indirect(&m.ty) {
                    continue;
                }
                for k in (0..m.number as usize).rev() {
                    tasks.push(RdTask::Pointer {
                        slot: dest.at(i * hbyt + m.offset + k * HANDLE_BYTES),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Read one itag at the current position and queue the reads of its
/// pointee into a fresh heap block, or resolve it against a block
/// already read.
fn read_pointer(
    ctx: &mut FileCtx,
    tasks: &mut Vec<RdTask>,
    slot: Slot,
    out: &mut [u8],
    heap: &mut Heap,
    aliases: &mut FxHashMap<i64, HeapHandle>,
) -> PdbResult<()> {
    let ipos = ctx.stream.tell()? as i64;
    let itag = read_itag(ctx.stream)?;

    if itag.addr == -1 || itag.nitems == 0 {
        write_handle(slot_mut(out, heap, slot, HANDLE_BYTES)?, 0, HeapHandle::NULL)?;
        return Ok(());
    }

    let hsize = ctx.host_chart.size_of(&itag.ty)?;

    if itag.flag {
        let h = heap.alloc(itag.nitems as usize * hsize);
        aliases.insert(ipos, h);
        write_handle(slot_mut(out, heap, slot, HANDLE_BYTES)?, 0, h)?;
        queue_pointee_reads(tasks, &itag.ty, itag.nitems, h);
    } else {
        // a copy; the address locates the original tag
        if let Some(&h) = aliases.get(&itag.addr) {
            write_handle(slot_mut(out, heap, slot, HANDLE_BYTES)?, 0, h)?;
            return Ok(());
        }
        let oaddr = ctx.stream.tell()?;
        ctx.stream.seek_to(itag.addr as u64)?;
        let orig = read_itag(ctx.stream)?;
        let h = heap.alloc(orig.nitems as usize * hsize);
        aliases.insert(itag.addr, h);
        write_handle(slot_mut(out, heap, slot, HANDLE_BYTES)?, 0, h)?;
        tasks.push(RdTask::Restore { addr: oaddr });
        queue_pointee_reads(tasks, &orig.ty, orig.nitems, h);
    }
    Ok(())
}

fn queue_pointee_reads(tasks: &mut Vec<RdTask>, ty: &str, nitems: u64, h: HeapHandle) {
    if is_indirect(ty) {
        for i in (0..nitems as usize).rev() {
            tasks.push(RdTask::Pointer { slot: Slot { space: Space::Block(h), offset: i * HANDLE_BYTES } });
        }
    } else {
        tasks.push(RdTask::Leaf {
            seek: None,
            nitems,
            intype: ty.to_string(),
            outtype: ty.to_string(),
            dest: Slot { space: Space::Block(h), offset: 0 },
        });
    }
}

enum WrTask {
    Leaf { nitems: u64, intype: String, outtype: String, src: Slot },
    Pointer { slot: Slot, ty: String },
}

/// Write `nitems` of `intype` from `src` to the current stream position
/// as `outtype`, itags and pointee data included. Returns the number of
/// items written.
///
/// Blocks reached through more than one pointer are written once; later
/// encounters emit a back-referencing itag to the first copy.
pub fn write_entry(
    ctx: &mut FileCtx,
    src: &[u8],
    nitems: u64,
    intype: &str,
    outtype: &str,
    heap: &Heap,
) -> PdbResult<u64> {
    log::trace!("write {} items of {} as {}", nitems, intype, outtype);

    let mut tasks: Vec<WrTask> = Vec::new();
    let mut aliases: FxHashMap<HeapHandle, i64> = FxHashMap::default();

    if is_indirect(intype) {
        let pointee = deref_type(intype);
        for i in (0..nitems as usize).rev() {
            tasks.push(WrTask::Pointer { slot: Slot::root(i * HANDLE_BYTES), ty: pointee.clone() });
        }
    } else {
        tasks.push(WrTask::Leaf {
            nitems,
            intype: intype.to_string(),
            outtype: outtype.to_string(),
            src: Slot::root(0),
        });
    }

    while let Some(task) = tasks.pop() {
        match task {
            WrTask::Leaf { nitems, intype, outtype, src: slot } => {
                write_leaf(ctx, &mut tasks, nitems, &intype, &outtype, slot, src, heap)?;
            }
            WrTask::Pointer { slot, ty } => {
                write_pointer(ctx, &mut tasks, slot, &ty, src, heap, &mut aliases)?;
            }
        }
    }

    Ok(nitems)
}

/// The true type of a pointer member on one host item, its cast
/// controller consulted when it has one.
fn resolved_member_type(
    item: &[u8],
    heap: &Heap,
    m: &crate::chart::Member,
) -> PdbResult<String> {
    let controller = match &m.cast_memb {
        Some(_) => read_handle(item, m.cast_offs)?,
        None => return Ok(m.ty.clone()),
    };
    if controller.is_null() {
        if !read_handle(item, m.offset)?.is_null() {
            return Err(PdbError::type_err(format!(
                "member {:?} is non-null but its cast controller is null",
                m.name
            )));
        }
        return Ok(m.ty.clone());
    }
    let bytes = heap.get(controller)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

#[allow(clippy::too_many_arguments)]
fn write_leaf(
    ctx: &mut FileCtx,
    tasks: &mut Vec<WrTask>,
    nitems: u64,
    intype: &str,
    outtype: &str,
    slot: Slot,
    src: &[u8],
    heap: &Heap,
) -> PdbResult<()> {
    let dpf = ctx.chart.lookup_required(outtype)?;
    let dph = ctx.host_chart.lookup_required(intype)?;
    let n = nitems as usize;
    let s = slot_ref(src, heap, slot, n * dph.size)?;

    if dpf.convert || intype != outtype {
        let mut buf = vec![0u8; n * dpf.size];
        let (mut so, mut doo) = (0usize, 0usize);
        convert::convert(
            ctx.chart,
            ctx.host_chart,
            outtype,
            intype,
            nitems,
            s,
            &mut so,
            &mut buf,
            &mut doo,
        )?;
        ctx.stream.write_all_bytes(&buf)?;
    } else {
        ctx.stream.write_all_bytes(s)?;
    }

    if dph.n_indirects > 0 {
        for i in (0..n).rev() {
            let item = &s[i * dph.size..(i + 1) * dph.size];
            for m in dph.members.iter().rev() {
                if m.cast_memb.is_none() && !is_indirect(&m.ty) {
                    continue;
                }
                let mty = resolved_member_type(item, heap, m)?;
                if !is_indirect(&mty) {
                    continue;
                }
                let pointee = deref_type(&mty);
                for k in (0..m.number as usize).rev() {
                    tasks.push(WrTask::Pointer {
                        slot: slot.at(i * dph.size + m.offset + k * HANDLE_BYTES),
                        ty: pointee.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn write_pointer(
    ctx: &mut FileCtx,
    tasks: &mut Vec<WrTask>,
    slot: Slot,
    ty: &str,
    src: &[u8],
    heap: &Heap,
    aliases: &mut FxHashMap<HeapHandle, i64>,
) -> PdbResult<()> {
    let h = read_handle(slot_ref(src, heap, slot, HANDLE_BYTES)?, 0)?;
    if h.is_null() {
        return write_itag(ctx.stream, 0, ty, -1, false);
    }

    let bpi = ctx.host_chart.size_of(ty)?;
    let nitems = heap.number_refd(h, bpi)?;

    if let Some(&orig) = aliases.get(&h) {
        return write_itag(ctx.stream, nitems, ty, orig, false);
    }

    let here = ctx.stream.tell()? as i64;
    aliases.insert(h, here);
    write_itag(ctx.stream, nitems, ty, here, true)?;

    if is_indirect(ty) {
        let pointee = deref_type(ty);
        for i in (0..nitems as usize).rev() {
            tasks.push(WrTask::Pointer {
                slot: Slot { space: Space::Block(h), offset: i * HANDLE_BYTES },
                ty: pointee.clone(),
            });
        }
    } else {
        tasks.push(WrTask::Leaf {
            nitems,
            intype: ty.to_string(),
            outtype: ty.to_string(),
            src: Slot { space: Space::Block(h), offset: 0 },
        });
    }
    Ok(())
}

/// One dimension of a hyper index walk, in index space relative to the
/// dimension's minimum.
#[derive(Clone, Copy, Debug, Default)]
pub struct DimInd {
    pub stride: i64,
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

/// Parse one range, `start`, `start:stop`, or `start:stop:step`.
pub fn init_dimind(offset: i64, stride: i64, expr: &str) -> PdbResult<DimInd> {
    let mut toks = expr.split(|c: char| c == ':' || c.is_whitespace()).filter(|t| !t.is_empty());
    let parse = |t: &str| {
        t.parse::<i64>()
            .map_err(|_| PdbError::syntax(expr, format!("bad index {:?}", t)))
    };

    let start = match toks.next() {
        Some(t) => parse(t)?,
        None => return Err(PdbError::syntax(expr, "empty index range")),
    };
    let stop = match toks.next() {
        Some(t) => parse(t)?,
        None => start,
    };
    let step = match toks.next() {
        Some(t) => parse(t)?,
        None => 1,
    };
    if step < 1 {
        return Err(PdbError::syntax(expr, "index step must be positive"));
    }

    Ok(DimInd { stride, start: start - offset, stop: stop - offset, step })
}

/// Strides and ranges for a full index expression over an entry's
/// dimensions, ordered slowest varying first. Every dimension needs a
/// range, and each range is checked against its dimension's extent.
pub fn compute_strides(
    expr: &str,
    dims: &[Dimension],
    order: MajorOrder,
    default_offset: i64,
) -> PdbResult<Vec<DimInd>> {
    let toks: Vec<&str> = expr
        .split(',')
        .map(|t| t.trim_matches(|c: char| c.is_whitespace() || "()[]".contains(c)))
        .collect();

    if dims.is_empty() {
        let pi = init_dimind(default_offset, 0, toks.first().copied().unwrap_or(""))?;
        return Ok(vec![pi]);
    }
    if toks.len() != dims.len() {
        return Err(PdbError::syntax(
            expr,
            format!("expression has {} ranges, entry has {} dimensions", toks.len(), dims.len()),
        ));
    }

    let nd = dims.len();
    let mut pi = vec![DimInd::default(); nd];
    match order {
        MajorOrder::Row => {
            let mut maxs: i64 = dims[1..].iter().map(|d| d.number() as i64).product();
            for i in 0..nd {
                pi[i] = init_dimind(dims[i].index_min, maxs, toks[i])?;
                if i + 1 < nd {
                    maxs /= dims[i + 1].number() as i64;
                }
            }
        }
        MajorOrder::Column => {
            let mut maxs = 1i64;
            for (j, d) in dims.iter().enumerate() {
                pi[nd - 1 - j] = init_dimind(d.index_min, maxs, toks[j])?;
                maxs *= d.number() as i64;
            }
        }
    }

    // ranges were parsed against their own dimension; bounds-check each
    // against the dimension it indexes
    let check = |p: &DimInd, d: &Dimension| -> PdbResult<()> {
        let n = d.number() as i64;
        if p.start < 0 || p.start > p.stop || p.stop >= n {
            return Err(PdbError::IndexOutOfBounds {
                index: p.start.min(p.stop) + d.index_min,
                count: d.number(),
            });
        }
        Ok(())
    };
    match order {
        MajorOrder::Row => {
            for (p, d) in pi.iter().zip(dims.iter()) {
                check(p, d)?;
            }
        }
        MajorOrder::Column => {
            for (j, d) in dims.iter().enumerate() {
                check(&pi[nd - 1 - j], d)?;
            }
        }
    }

    Ok(pi)
}

/// Items selected by an index expression and the item offset of its
/// first element.
pub fn hyper_count(
    expr: &str,
    dims: &[Dimension],
    order: MajorOrder,
    default_offset: i64,
) -> PdbResult<(u64, i64)> {
    let pi = compute_strides(expr, dims, order, default_offset)?;
    let mut sum = 1i64;
    let mut offs = 0i64;
    for p in &pi {
        sum *= (p.stop - p.start + p.step) / p.step;
        offs += p.start * p.stride;
    }
    Ok((sum.max(0) as u64, offs))
}

/// Read the part of an entry selected by an index expression.
pub fn read_hyper(
    ctx: &mut FileCtx,
    ep: &EffectiveEntry,
    expr: &str,
    outtype: &str,
    out: &mut [u8],
    heap: &mut Heap,
) -> PdbResult<u64> {
    if is_indirect(&ep.ty) || is_indirect(outtype) {
        return Err(PdbError::type_err("cannot hyper index an indirect type"));
    }
    let pi = compute_strides(expr, &ep.dims, ctx.major_order, ctx.default_offset)?;
    let fbyt = ctx.chart.size_of(&ep.ty)? as i64;
    let hbyt = ctx.host_chart.size_of(outtype)?;
    let blocks: Vec<SymBlock> = if ep.blocks.is_empty() {
        vec![SymBlock { addr: ep.addr, number: ep.number }]
    } else {
        ep.blocks.clone()
    };
    let walk = HyperWalk { base: ep.addr, indir: ep.indir };
    let n = rd_hyper_index(ctx, &pi, &ep.ty, outtype, ep.addr, &blocks, hbyt, fbyt, &walk, out, 0, heap)?;
    Ok(n as u64)
}

/// Indirect-location state carried through a hyper read: the resolved
/// entry's itag region and the item index its `arr_offs` refers to.
#[derive(Clone, Copy)]
struct HyperWalk {
    base: i64,
    indir: IndirInfo,
}

impl HyperWalk {
    /// The itag location for the element at walk address `addr`,
    /// `arr_offs` advanced by the item distance from the walk's base.
    fn indir_at(&self, addr: i64, fbyt: i64) -> IndirInfo {
        if self.indir.addr > 0 && addr >= self.base && fbyt > 0 {
            IndirInfo {
                arr_offs: self.indir.arr_offs + (addr - self.base) / fbyt,
                ..self.indir
            }
        } else {
            IndirInfo::default()
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn rd_hyper_index(
    ctx: &mut FileCtx,
    pi: &[DimInd],
    intype: &str,
    outtype: &str,
    addr: i64,
    blocks: &[SymBlock],
    hbyt: usize,
    fbyt: i64,
    walk: &HyperWalk,
    out: &mut [u8],
    out_offs: usize,
    heap: &mut Heap,
) -> PdbResult<usize> {
    let d = pi[0];
    let stride = fbyt * d.stride;
    let start = stride * d.start;
    let mut stop = stride * d.stop;
    let mut step = stride * d.step;

    if addr < 0 {
        // bit addressed data walks backward in negative bit space
        let dpf = ctx.chart.lookup_required(intype)?;
        stop = addr - dpf.size_bits as i64 * ((stop - start) / fbyt);
        step = -(dpf.size_bits as i64) * (step / fbyt);
    } else {
        stop = addr + (stop - start);
    }

    let mut nrd = 0usize;
    if stride <= fbyt {
        nrd += read_hyper_space(ctx, intype, outtype, blocks, hbyt, fbyt, addr, stop, step, walk, out, out_offs, heap)?;
    } else if addr < 0 {
        let mut offset = -addr;
        while offset <= -stop {
            let nir = rd_hyper_index(
                ctx, &pi[1..], intype, outtype, -offset, blocks, hbyt, fbyt, walk, out,
                out_offs + nrd * hbyt, heap,
            )?;
            nrd += nir;
            offset -= step;
        }
    } else {
        let mut offset = addr;
        while offset <= stop {
            let nir = rd_hyper_index(
                ctx, &pi[1..], intype, outtype, offset, blocks, hbyt, fbyt, walk, out,
                out_offs + nrd * hbyt, heap,
            )?;
            nrd += nir;
            offset += step;
        }
    }
    Ok(nrd)
}

#[allow(clippy::too_many_arguments)]
fn read_hyper_space(
    ctx: &mut FileCtx,
    intype: &str,
    outtype: &str,
    blocks: &[SymBlock],
    hbyt: usize,
    fbyt: i64,
    mut addr: i64,
    stop: i64,
    step: i64,
    walk: &HyperWalk,
    out: &mut [u8],
    mut out_offs: usize,
    heap: &mut Heap,
) -> PdbResult<usize> {
    let tep = |number: u64, addr: i64, indir: IndirInfo| EffectiveEntry {
        ty: intype.to_string(),
        number,
        addr,
        dims: Vec::new(),
        blocks: Vec::new(),
        indir,
    };

    let mut nrd = 0usize;
    if addr >= 0 {
        if step == fbyt {
            // logically contiguous, read across blocks
            let mut nitems = (stop - addr) / step + 1;
            while nitems > 0 {
                let indir = walk.indir_at(addr, fbyt);
                let (mut eaddr, mut nb) = effective_addr(addr, fbyt, blocks);
                // entries reached through pointers have no real block
                // list; fall back to the contiguous address
                if eaddr == 0 || nb == 0 {
                    eaddr = addr;
                    nb = nitems;
                }
                let niw = nitems.min(nb);
                let ep = tep(niw as u64, eaddr, indir);
                nrd += read_entry(
                    ctx,
                    &ep,
                    outtype,
                    &mut out[out_offs..out_offs + niw as usize * hbyt],
                    heap,
                )? as usize;
                nitems -= niw;
                addr += fbyt * niw;
                out_offs += hbyt * niw as usize;
            }
        } else {
            while addr <= stop {
                let indir = walk.indir_at(addr, fbyt);
                let (eaddr, _) = effective_addr(addr, fbyt, blocks);
                let ep = tep(1, eaddr, indir);
                nrd += read_entry(ctx, &ep, outtype, &mut out[out_offs..out_offs + hbyt], heap)?
                    as usize;
                addr += step;
                out_offs += hbyt;
            }
        }
    } else {
        // bitstream; multi-block bitstreams are not supported
        let dpf = ctx.chart.lookup_required(intype)?;
        if step == -(dpf.size_bits as i64) {
            let nitems = (stop - addr) / step + 1;
            let ep = tep(nitems as u64, addr, IndirInfo::default());
            nrd += read_entry(
                ctx,
                &ep,
                outtype,
                &mut out[out_offs..out_offs + nitems as usize * hbyt],
                heap,
            )? as usize;
        } else {
            while addr >= stop {
                let ep = tep(1, addr, IndirInfo::default());
                nrd += read_entry(ctx, &ep, outtype, &mut out[out_offs..out_offs + hbyt], heap)?
                    as usize;
                addr += step;
                out_offs += hbyt;
            }
        }
    }
    Ok(nrd)
}

/// Write into the part of an entry selected by an index expression.
pub fn write_hyper(
    ctx: &mut FileCtx,
    ep: &EffectiveEntry,
    expr: &str,
    intype: &str,
    src: &[u8],
    heap: &Heap,
) -> PdbResult<()> {
    if is_indirect(&ep.ty) {
        return Err(PdbError::type_err("cannot hyper index an indirect type"));
    }
    let pi = compute_strides(expr, &ep.dims, ctx.major_order, ctx.default_offset)?;
    let fbyt = ctx.chart.size_of(&ep.ty)? as i64;
    let hbyt = ctx.host_chart.size_of(intype)?;
    let blocks: Vec<SymBlock> = if ep.blocks.is_empty() {
        vec![SymBlock { addr: ep.addr, number: ep.number }]
    } else {
        ep.blocks.clone()
    };
    wr_hyper_index(ctx, &pi, intype, &ep.ty, ep.addr, &blocks, hbyt, fbyt, src, 0, heap)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wr_hyper_index(
    ctx: &mut FileCtx,
    pi: &[DimInd],
    intype: &str,
    outtype: &str,
    addr: i64,
    blocks: &[SymBlock],
    hbyt: usize,
    fbyt: i64,
    src: &[u8],
    in_offs: usize,
    heap: &Heap,
) -> PdbResult<usize> {
    let d = pi[0];
    let stride = fbyt * d.stride;
    let start = stride * d.start;
    let stop = addr + stride * d.stop - start;
    let step = stride * d.step;

    let mut nwr = 0usize;
    if stride <= fbyt {
        nwr += write_hyper_space(ctx, intype, outtype, blocks, hbyt, fbyt, addr, stop, step, src, in_offs, heap)?;
    } else {
        let mut offset = addr;
        while offset <= stop {
            nwr += wr_hyper_index(
                ctx, &pi[1..], intype, outtype, offset, blocks, hbyt, fbyt, src,
                in_offs + nwr * hbyt, heap,
            )?;
            offset += step;
        }
    }
    Ok(nwr)
}

#[allow(clippy::too_many_arguments)]
fn write_hyper_space(
    ctx: &mut FileCtx,
    intype: &str,
    outtype: &str,
    blocks: &[SymBlock],
    hbyt: usize,
    fbyt: i64,
    mut addr: i64,
    stop: i64,
    step: i64,
    src: &[u8],
    mut in_offs: usize,
    heap: &Heap,
) -> PdbResult<usize> {
    let mut nwr = 0usize;
    if step == fbyt {
        let mut nitems = (stop - addr) / step + 1;
        while nitems > 0 {
            let (mut eaddr, mut nb) = effective_addr(addr, fbyt, blocks);
            if eaddr == 0 || nb == 0 {
                eaddr = addr;
                nb = nitems;
            }
            let niw = nitems.min(nb);
            ctx.stream.seek_to(eaddr as u64)?;
            nwr += write_entry(
                ctx,
                &src[in_offs..in_offs + niw as usize * hbyt],
                niw as u64,
                intype,
                outtype,
                heap,
            )? as usize;
            nitems -= niw;
            addr += fbyt * niw;
            in_offs += hbyt * niw as usize;
        }
    } else {
        while addr <= stop {
            let (eaddr, _) = effective_addr(addr, fbyt, blocks);
            ctx.stream.seek_to(eaddr as u64)?;
            nwr += write_entry(ctx, &src[in_offs..in_offs + hbyt], 1, intype, outtype, heap)?
                as usize;
            addr += step;
            in_offs += hbyt;
        }
    }
    Ok(nwr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::parse_member;
    use crate::standard::{Alignment, NumericStandard};
    use crate::stream::MemStream;

    fn charts(file_std: NumericStandard, file_align: Alignment) -> (Chart, Chart) {
        let host_std = NumericStandard::host();
        let host = Chart::seeded(host_std.clone(), Alignment::HOST, &host_std, true);
        let file = Chart::seeded(file_std, file_align, &host_std, false);
        (file, host)
    }

    fn native_charts() -> (Chart, Chart) {
        charts(NumericStandard::host(), Alignment::HOST)
    }

    fn ctx<'a>(stream: &'a mut MemStream, file: &'a Chart, host: &'a Chart) -> FileCtx<'a> {
        FileCtx {
            stream,
            chart: file,
            host_chart: host,
            major_order: MajorOrder::Row,
            default_offset: 0,
        }
    }

    fn doubles(vals: &[f64]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn itags_round_trip_and_tolerate_short_lines() {
        let mut ms = MemStream::new();
        write_itag(&mut ms, 12, "double", 4096, true).unwrap();
        ms.write_str("3\u{1}char *\u{1}\n").unwrap();
        ms.seek_to(0).unwrap();

        let t = read_itag(&mut ms).unwrap();
        assert_eq!((t.nitems, t.ty.as_str(), t.addr, t.flag), (12, "double", 4096, true));
        let short = read_itag(&mut ms).unwrap();
        assert_eq!((short.nitems, short.addr, short.flag), (3, -1, true));
    }

    #[test]
    fn leaf_entry_round_trips_across_blocks() {
        let (file, host) = native_charts();
        let vals: Vec<f64> = (0..10).map(|i| i as f64 * 1.5).collect();
        let mut ms = MemStream::new();
        let heap = Heap::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            c.stream.seek_to(100).unwrap();
            write_entry(&mut c, &doubles(&vals[..6]), 6, "double", "double", &heap).unwrap();
            c.stream.seek_to(400).unwrap();
            write_entry(&mut c, &doubles(&vals[6..]), 4, "double", "double", &heap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "double".to_string(),
            number: 10,
            addr: 100,
            dims: vec![Dimension::new(0, 9)],
            blocks: vec![SymBlock { addr: 100, number: 6 }, SymBlock { addr: 400, number: 4 }],
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 80];
        let mut heap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        assert_eq!(read_entry(&mut c, &ep, "double", &mut out, &mut heap).unwrap(), 10);
        assert_eq!(out, doubles(&vals));
    }

    #[test]
    fn leaf_entry_converts_through_a_foreign_standard() {
        let (file, host) = charts(NumericStandard::cray(), Alignment::UNICOS);
        let vals = [1.0f64, -2.5, 3.25e4, -7.5e-3];
        let mut ms = MemStream::new();
        let heap = Heap::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &doubles(&vals), 4, "double", "double", &heap).unwrap();
        }
        // file bytes differ from host bytes
        assert_ne!(&ms.as_bytes()[..32], &doubles(&vals)[..]);

        let ep = EffectiveEntry {
            ty: "double".to_string(),
            number: 4,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 32];
        let mut heap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "double", &mut out, &mut heap).unwrap();
        assert_eq!(out, doubles(&vals));
    }

    #[test]
    fn pointers_round_trip_through_itags() {
        let (file, host) = native_charts();
        let vals = [2.0f64, 4.0, 8.0];
        let mut ms = MemStream::new();
        let mut wheap = Heap::new();
        let h = wheap.alloc_from(&doubles(&vals));
        let mut src = vec![0u8; 8];
        write_handle(&mut src, 0, h).unwrap();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &src, 1, "double *", "double *", &wheap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "double *".to_string(),
            number: 1,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 8];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "double *", &mut out, &mut rheap).unwrap();
        let rh = read_handle(&out, 0).unwrap();
        assert!(!rh.is_null());
        assert_eq!(rheap.get(rh).unwrap(), &doubles(&vals)[..]);
    }

    #[test]
    fn shared_blocks_are_written_once_and_shared_on_read() {
        let (file, host) = native_charts();
        let mut ms = MemStream::new();
        let mut wheap = Heap::new();
        let h = wheap.alloc_from(&doubles(&[1.0, 2.0]));
        let mut src = vec![0u8; 16];
        write_handle(&mut src, 0, h).unwrap();
        write_handle(&mut src, 8, h).unwrap();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &src, 2, "double *", "double *", &wheap).unwrap();
        }
        // the data appears once on the stream
        let text = String::from_utf8_lossy(ms.as_bytes()).into_owned();
        assert_eq!(text.matches("double\u{1}").count(), 2);

        let ep = EffectiveEntry {
            ty: "double *".to_string(),
            number: 2,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 16];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "double *", &mut out, &mut rheap).unwrap();
        let a = read_handle(&out, 0).unwrap();
        let b = read_handle(&out, 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(rheap.len(), 1);
    }

    #[test]
    fn null_pointers_survive_the_round_trip() {
        let (file, host) = native_charts();
        let mut ms = MemStream::new();
        let heap = Heap::new();
        let src = vec![0u8; 8];
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &src, 1, "long *", "long *", &heap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "long *".to_string(),
            number: 1,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0xffu8; 8];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "long *", &mut out, &mut rheap).unwrap();
        assert!(read_handle(&out, 0).unwrap().is_null());
        assert!(rheap.is_empty());
    }

    #[test]
    fn structs_with_pointer_members_round_trip() {
        let (mut file, mut host) = native_charts();
        for c in [&mut file, &mut host] {
            c.install_struct(
                "series",
                vec![
                    parse_member("long n", 0).unwrap(),
                    parse_member("double *y", 0).unwrap(),
                ],
            )
            .unwrap();
        }
        let hd = host.lookup("series").unwrap();
        let ym = hd.members[1].offset;

        let mut wheap = Heap::new();
        let h = wheap.alloc_from(&doubles(&[0.5, 1.5, 2.5]));
        let mut src = vec![0u8; hd.size];
        src[..8].copy_from_slice(&3i64.to_le_bytes());
        write_handle(&mut src, ym, h).unwrap();

        let mut ms = MemStream::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &src, 1, "series", "series", &wheap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "series".to_string(),
            number: 1,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; hd.size];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "series", &mut out, &mut rheap).unwrap();
        assert_eq!(&out[..8], &3i64.to_le_bytes());
        let rh = read_handle(&out, ym).unwrap();
        assert_eq!(rheap.get(rh).unwrap(), &doubles(&[0.5, 1.5, 2.5])[..]);
    }

    #[test]
    fn cast_members_write_the_controller_resolved_type() {
        let (mut file, mut host) = native_charts();
        for c in [&mut file, &mut host] {
            c.install_struct(
                "box",
                vec![
                    parse_member("char *kind", 0).unwrap(),
                    parse_member("char *data", 0).unwrap(),
                ],
            )
            .unwrap();
            c.set_cast("box", "data", "kind").unwrap();
        }
        let hd = host.lookup("box").unwrap();

        let mut wheap = Heap::new();
        let kind = wheap.alloc_from(b"double *\0");
        let data = wheap.alloc_from(&doubles(&[9.25, -1.0]));
        let mut src = vec![0u8; hd.size];
        write_handle(&mut src, hd.members[0].offset, kind).unwrap();
        write_handle(&mut src, hd.members[1].offset, data).unwrap();

        let mut ms = MemStream::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &src, 1, "box", "box", &wheap).unwrap();
        }
        let text = String::from_utf8_lossy(ms.as_bytes()).into_owned();
        assert!(text.contains("2\u{1}double\u{1}"), "data itag carries the cast type: {:?}", text);

        let ep = EffectiveEntry {
            ty: "box".to_string(),
            number: 1,
            addr: 0,
            dims: Vec::new(),
            blocks: Vec::new(),
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; hd.size];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "box", &mut out, &mut rheap).unwrap();
        let dh = read_handle(&out, hd.members[1].offset).unwrap();
        assert_eq!(rheap.get(dh).unwrap(), &doubles(&[9.25, -1.0])[..]);
    }

    #[test]
    fn hyper_count_and_offset_follow_row_major_strides() {
        let dims = vec![Dimension::new(0, 3), Dimension::new(0, 4)];
        let (n, offs) = hyper_count("1:2,0:4:2", &dims, MajorOrder::Row, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(offs, 5);

        let (n, offs) = hyper_count("3,4", &dims, MajorOrder::Row, 0).unwrap();
        assert_eq!(n, 1);
        assert_eq!(offs, 19);
    }

    #[test]
    fn hyper_ranges_are_checked_against_dimensions() {
        let dims = vec![Dimension::new(1, 5)];
        assert!(matches!(
            hyper_count("6", &dims, MajorOrder::Row, 1),
            Err(PdbError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            hyper_count("1,2", &dims, MajorOrder::Row, 1),
            Err(PdbError::Syntax { .. })
        ));
    }

    #[test]
    fn hyper_read_selects_a_strided_slice() {
        let (file, host) = native_charts();
        let vals: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut ms = MemStream::new();
        let heap = Heap::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            c.stream.seek_to(64).unwrap();
            write_entry(&mut c, &doubles(&vals), 10, "double", "double", &heap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "double".to_string(),
            number: 10,
            addr: 64,
            dims: vec![Dimension::new(0, 9)],
            blocks: vec![SymBlock { addr: 64, number: 10 }],
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 32];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        let n = read_hyper(&mut c, &ep, "2:8:2", "double", &mut out, &mut rheap).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, doubles(&[2.0, 4.0, 6.0, 8.0]));
    }

    #[test]
    fn hyper_read_walks_two_dimensions_in_row_major_order() {
        let (file, host) = native_charts();
        // a 3x4 array, a[i][j] = 10*i + j
        let vals: Vec<f64> =
            (0..3).flat_map(|i| (0..4).map(move |j| (10 * i + j) as f64)).collect();
        let mut ms = MemStream::new();
        let heap = Heap::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &doubles(&vals), 12, "double", "double", &heap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "double".to_string(),
            number: 12,
            addr: 0,
            dims: vec![Dimension::new(0, 2), Dimension::new(0, 3)],
            blocks: vec![SymBlock { addr: 0, number: 12 }],
            indir: IndirInfo::default(),
        };
        let mut out = vec![0u8; 32];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        let n = read_hyper(&mut c, &ep, "1:2,1:2", "double", &mut out, &mut rheap).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, doubles(&[11.0, 12.0, 21.0, 22.0]));
    }

    #[test]
    fn hyper_write_updates_a_slice_in_place() {
        let (file, host) = native_charts();
        let vals: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let mut ms = MemStream::new();
        let heap = Heap::new();
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_entry(&mut c, &doubles(&vals), 8, "double", "double", &heap).unwrap();
        }

        let ep = EffectiveEntry {
            ty: "double".to_string(),
            number: 8,
            addr: 0,
            dims: vec![Dimension::new(0, 7)],
            blocks: vec![SymBlock { addr: 0, number: 8 }],
            indir: IndirInfo::default(),
        };
        {
            let mut c = ctx(&mut ms, &file, &host);
            write_hyper(&mut c, &ep, "2:4", "double", &doubles(&[-1.0, -2.0, -3.0]), &heap)
                .unwrap();
        }

        let mut out = vec![0u8; 64];
        let mut rheap = Heap::new();
        let mut c = ctx(&mut ms, &file, &host);
        read_entry(&mut c, &ep, "double", &mut out, &mut rheap).unwrap();
        assert_eq!(out, doubles(&[0.0, 1.0, -1.0, -2.0, -3.0, 5.0, 6.0, 7.0]));
    }

    #[test]
    fn effective_addr_resolves_across_blocks() {
        let blocks =
            vec![SymBlock { addr: 100, number: 4 }, SymBlock { addr: 900, number: 6 }];
        assert_eq!(effective_addr(116, 8, &blocks), (116, 2));
        // item 5 lives 8 bytes into the second block
        assert_eq!(effective_addr(100 + 5 * 8, 8, &blocks), (908, 5));
        // past the end triggers the caller's contiguous fallback
        assert_eq!(effective_addr(100 + 80, 8, &blocks).1, 0);
    }
}
