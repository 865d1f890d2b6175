//! Source emission for the tiled matmul kernel.

use crate::config::{LoopOrder, MatmulParams, RhsLayout};
use crate::device::SourceDialect;
use std::fmt::Write;

/// Entry point name shared by every dialect.
pub const ENTRY_POINT: &str = "tiled_matmul";

pub fn matmul_source(params: &MatmulParams, dialect: SourceDialect) -> String {
    match dialect {
        SourceDialect::Wgsl => wgsl_source(params),
        SourceDialect::Host => host_source(params),
    }
}

/// Key/value description consumed by the host device.
pub fn host_source(params: &MatmulParams) -> String {
    format!(
        "kernel {entry}\ngroup {gm} {gn}\nblock {bm} {bn}\ntile_k {tk}\nunroll {un}\norder {order}\nrhs_layout {layout}\n",
        entry = ENTRY_POINT,
        gm = params.group_m,
        gn = params.group_n,
        bm = params.block_m,
        bn = params.block_n,
        tk = params.tile_k,
        un = params.unroll,
        order = params.order.keyword(),
        layout = params.problem.rhs_layout.keyword(),
    )
}

/// WGSL compute shader: each invocation owns one `block_m x block_n` block
/// of the output and walks `k` in `tile_k` steps with `unroll` copies of the
/// inner accumulation.
pub fn wgsl_source(params: &MatmulParams) -> String {
    let rhs_at = match params.problem.rhs_layout {
        RhsLayout::RowMajor => "rhs[q * params.n + col0 + j]",
        RhsLayout::Transposed => "rhs[(col0 + j) * params.k + q]",
    };
    let (outer, inner, outer_bound, inner_bound) = match params.order {
        LoopOrder::Row => ("i", "j", params.block_m, params.block_n),
        LoopOrder::Column => ("j", "i", params.block_n, params.block_m),
    };

    let mut body = String::new();
    for copy in 0..params.unroll {
        // Writing into a String cannot fail.
        let _ = write!(
            body,
            r#"
      {{
        let q = t + s + {copy}u;
        for (var {outer}: u32 = 0u; {outer} < {outer_bound}u; {outer} = {outer} + 1u) {{
          for (var {inner}: u32 = 0u; {inner} < {inner_bound}u; {inner} = {inner} + 1u) {{
            acc[i * {bn}u + j] = acc[i * {bn}u + j] + lhs[(row0 + i) * params.k + q] * {rhs_at};
          }}
        }}
      }}"#,
            bn = params.block_n,
        );
    }

    format!(
        r#"
struct Params {{
  m: u32,
  n: u32,
  k: u32,
  _pad: u32,
}}

@group(0) @binding(0)
var<storage, read> lhs: array<f32>;

@group(0) @binding(1)
var<storage, read> rhs: array<f32>;

@group(0) @binding(2)
var<storage, read_write> out: array<f32>;

@group(0) @binding(3)
var<uniform> params: Params;

@compute @workgroup_size({gm}, {gn}, 1)
fn {entry}(@builtin(global_invocation_id) gid: vec3<u32>) {{
  let row0 = gid.x * {bm}u;
  let col0 = gid.y * {bn}u;
  if (row0 >= params.m || col0 >= params.n) {{
    return;
  }}

  var acc: array<f32, {block}>;
  for (var t: u32 = 0u; t < params.k; t = t + {tk}u) {{
    for (var s: u32 = 0u; s < {tk}u; s = s + {un}u) {{{body}
    }}
  }}

  for (var i: u32 = 0u; i < {bm}u; i = i + 1u) {{
    for (var j: u32 = 0u; j < {bn}u; j = j + 1u) {{
      out[(row0 + i) * params.n + col0 + j] = acc[i * {bn}u + j];
    }}
  }}
}}
"#,
        entry = ENTRY_POINT,
        gm = params.group_m,
        gn = params.group_n,
        bm = params.block_m,
        bn = params.block_n,
        block = params.block_m * params.block_n,
        tk = params.tile_k,
        un = params.unroll,
    )
}
