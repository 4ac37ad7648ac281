//! The scale kernel.
//!
//! Every execution context runs the same contract: for `i < n`,
//! `out[i] = scale * in[i]`.  Elements at or beyond `n` are left
//! untouched.  The host context calls [`scale_block`] directly and the
//! GPU context compiles [`SCALE_SHADER`].

/// Name of the kernel entry point in every program.
pub const ENTRY_POINT: &str = "scal";

/// Entry name for the compute unit serving lane `lane`.
///
/// Multi-lane programs carry one compute unit per lane, named
/// `scal_1`, `scal_2`, ...; the entry name selects the kernel and the
/// unit as `scal:{scal_N}`.
pub fn compute_unit_entry(lane: usize) -> String {
    format!("{ENTRY_POINT}:{{{ENTRY_POINT}_{}}}", lane + 1)
}

/// Split an entry name into the kernel name and the optional compute
/// unit, e.g. `scal:{scal_3}` into `("scal", Some("scal_3"))`.
pub fn parse_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(':') {
        Some((kernel, unit)) => {
            let unit = unit.trim_start_matches('{').trim_end_matches('}');
            (kernel, Some(unit))
        }
        None => (entry, None),
    }
}

/// Scale the first `n` elements of `input` into `output`.
///
/// # Panics
///
/// Panics if either slice is shorter than `n`.
pub fn scale_block(input: &[f32], output: &mut [f32], n: usize, scale: f32) {
    for (out, x) in output[..n].iter_mut().zip(&input[..n]) {
        *out = scale * *x;
    }
}

/// WGSL source of the scale kernel.
///
/// Parameters arrive in a uniform: the element count and the scale.  The
/// dispatch may be a 2-D grid when the element count needs more
/// workgroups than one dimension allows; `row_stride` is the number of
/// invocations per grid row.
pub const SCALE_SHADER: &str = r#"
struct Params {
    n: u32,
    row_stride: u32,
    scale: f32,
    _pad: u32,
};

@group(0) @binding(0)
var<storage, read> input: array<f32>;
@group(0) @binding(1)
var<storage, read_write> output: array<f32>;
@group(0) @binding(2)
var<uniform> params: Params;

@compute @workgroup_size(64)
fn scal(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.y * params.row_stride + gid.x;
    if (i >= params.n) {
        return;
    }
    output[i] = params.scale * input[i];
}
"#;
