//! Parsing of host-dialect kernel programs.

use kerneltune_kernels::{DeviceError, LoopOrder, RhsLayout};

/// Limits enforced at build time, mirroring what a real driver would reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    pub max_group_invocations: usize,
    pub max_block_elements: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_group_invocations: 256,
            max_block_elements: 64,
        }
    }
}

/// A "compiled" host program: the tiling recipe the executor follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProgram {
    pub group_m: usize,
    pub group_n: usize,
    pub block_m: usize,
    pub block_n: usize,
    pub tile_k: usize,
    pub unroll: usize,
    pub order: LoopOrder,
    pub rhs_layout: RhsLayout,
}

#[derive(Default)]
struct Fields {
    kernel: Option<String>,
    group: Option<(usize, usize)>,
    block: Option<(usize, usize)>,
    tile_k: Option<usize>,
    unroll: Option<usize>,
    order: Option<LoopOrder>,
    rhs_layout: Option<RhsLayout>,
}

pub fn parse_program(
    source: &str,
    entry: &str,
    limits: &HostLimits,
) -> Result<HostProgram, DeviceError> {
    let mut fields = Fields::default();

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fail = |what: &str| DeviceError::Build(format!("line {}: {what}: {line:?}", idx + 1));
        let mut words = line.split_whitespace();
        let key = words.next().unwrap_or_default();
        let values: Vec<&str> = words.collect();

        match (key, values.as_slice()) {
            ("kernel", [name]) => set_once(&mut fields.kernel, name.to_string(), &fail)?,
            ("group", [m, n]) => set_once(&mut fields.group, (number(m, &fail)?, number(n, &fail)?), &fail)?,
            ("block", [m, n]) => set_once(&mut fields.block, (number(m, &fail)?, number(n, &fail)?), &fail)?,
            ("tile_k", [v]) => set_once(&mut fields.tile_k, number(v, &fail)?, &fail)?,
            ("unroll", [v]) => set_once(&mut fields.unroll, number(v, &fail)?, &fail)?,
            ("order", [v]) => {
                let order = LoopOrder::from_keyword(v).ok_or_else(|| fail("unknown loop order"))?;
                set_once(&mut fields.order, order, &fail)?
            }
            ("rhs_layout", [v]) => {
                let layout = RhsLayout::from_keyword(v).ok_or_else(|| fail("unknown rhs layout"))?;
                set_once(&mut fields.rhs_layout, layout, &fail)?
            }
            _ => return Err(fail("unrecognised directive")),
        }
    }

    let missing = |name: &str| DeviceError::Build(format!("missing `{name}` directive"));
    let kernel = fields.kernel.ok_or_else(|| missing("kernel"))?;
    if kernel != entry {
        return Err(DeviceError::Build(format!(
            "entry point `{entry}` not found (program defines `{kernel}`)"
        )));
    }
    let (group_m, group_n) = fields.group.ok_or_else(|| missing("group"))?;
    let (block_m, block_n) = fields.block.ok_or_else(|| missing("block"))?;
    let program = HostProgram {
        group_m,
        group_n,
        block_m,
        block_n,
        tile_k: fields.tile_k.ok_or_else(|| missing("tile_k"))?,
        unroll: fields.unroll.ok_or_else(|| missing("unroll"))?,
        order: fields.order.ok_or_else(|| missing("order"))?,
        rhs_layout: fields.rhs_layout.ok_or_else(|| missing("rhs_layout"))?,
    };

    let overflow = |what: &str| DeviceError::Build(format!("{what} size overflows usize"));
    let invocations = group_m.checked_mul(group_n).ok_or_else(|| overflow("work group"))?;
    if invocations > limits.max_group_invocations {
        return Err(DeviceError::Build(format!(
            "work group of {invocations} invocations exceeds {}",
            limits.max_group_invocations
        )));
    }
    let elements = block_m.checked_mul(block_n).ok_or_else(|| overflow("block"))?;
    if elements > limits.max_block_elements {
        return Err(DeviceError::Build(format!(
            "block of {elements} elements exceeds {}",
            limits.max_block_elements
        )));
    }
    if program.tile_k % program.unroll != 0 {
        return Err(DeviceError::Build(format!(
            "unroll {} does not divide tile_k {}",
            program.unroll, program.tile_k
        )));
    }
    Ok(program)
}

fn number(word: &str, fail: &impl Fn(&str) -> DeviceError) -> Result<usize, DeviceError> {
    match word.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(fail("expected a positive integer")),
    }
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    fail: &impl Fn(&str) -> DeviceError,
) -> Result<(), DeviceError> {
    if slot.replace(value).is_some() {
        return Err(fail("duplicate directive"));
    }
    Ok(())
}
