//! WGSL source for the four equalization kernels.
//!
//! The source is generated at startup so the histogram/back-projection
//! workgroup size can follow the device's dispatch granularity instead of
//! being baked in. Bin count is fixed at 256: input samples are single
//! bytes, so every intensity indexes the table directly.

/// Intensity levels per image, and the length of every histogram buffer.
pub const BIN_COUNT: u32 = 256;

/// Entry point names, in dependency order.
pub const ENTRY_HISTOGRAM: &str = "intensity_histogram";
pub const ENTRY_CUMULATIVE: &str = "cumulative_histogram";
pub const ENTRY_NORMALIZE: &str = "normalize_scale";
pub const ENTRY_BACK_PROJECT: &str = "back_project";

/// Build the shader module source for a given workgroup size.
///
/// Pixels travel packed four-per-u32 word; kernels that touch the image
/// operate on whole words so no two invocations write the same word.
pub fn pipeline_source(workgroup_size: u32) -> String {
    let prelude = format!(
        "const WG_SIZE: u32 = {workgroup_size}u;\nconst BIN_COUNT: u32 = {BIN_COUNT}u;\n"
    );
    format!("{prelude}{KERNEL_BODY}")
}

const KERNEL_BODY: &str = r#"
struct Params {
    pixel_count: u32,
    word_count: u32,
    scale: f32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> src_words: array<u32>;
@group(0) @binding(1) var<storage, read_write> histogram: array<atomic<u32>, BIN_COUNT>;
@group(0) @binding(2) var<storage, read_write> cumulative: array<u32, BIN_COUNT>;
@group(0) @binding(3) var<storage, read_write> remap: array<u32, BIN_COUNT>;
@group(0) @binding(4) var<storage, read_write> dst_words: array<u32>;
@group(0) @binding(5) var<uniform> params: Params;

// One scratch histogram per group, not per invocation.
var<workgroup> scratch: array<atomic<u32>, BIN_COUNT>;

// Stage 1: per-group scratch accumulation, then a commutative atomic merge
// into the global histogram. Invocations past the word count contribute
// nothing; the final word masks pixels past pixel_count.
@compute @workgroup_size(WG_SIZE)
fn intensity_histogram(@builtin(global_invocation_id) gid: vec3<u32>,
                       @builtin(local_invocation_id) lid: vec3<u32>) {
    var bin = lid.x;
    while (bin < BIN_COUNT) {
        atomicStore(&scratch[bin], 0u);
        bin += WG_SIZE;
    }
    workgroupBarrier();

    let word = gid.x;
    if (word < params.word_count) {
        let w = src_words[word];
        for (var b = 0u; b < 4u; b += 1u) {
            if (word * 4u + b < params.pixel_count) {
                let v = (w >> (8u * b)) & 0xffu;
                atomicAdd(&scratch[v], 1u);
            }
        }
    }
    workgroupBarrier();

    bin = lid.x;
    while (bin < BIN_COUNT) {
        let count = atomicLoad(&scratch[bin]);
        if (count != 0u) {
            atomicAdd(&histogram[bin], count);
        }
        bin += WG_SIZE;
    }
}

// Stage 2: inclusive prefix sum. One invocation owns one prefix range;
// a single 256-wide group covers the whole table.
@compute @workgroup_size(BIN_COUNT)
fn cumulative_histogram(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= BIN_COUNT) {
        return;
    }
    var sum = 0u;
    for (var j = 0u; j <= i; j += 1u) {
        sum += atomicLoad(&histogram[j]);
    }
    cumulative[i] = sum;
}

// Stage 3: scale each cumulative count into an output level. Rounding rule
// is floor (u32 truncation), clamped at the top bin.
@compute @workgroup_size(BIN_COUNT)
fn normalize_scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= BIN_COUNT) {
        return;
    }
    let level = u32(f32(cumulative[i]) * params.scale);
    remap[i] = min(level, BIN_COUNT - 1u);
}

// Stage 4: independent per-word table lookup, no shared state.
@compute @workgroup_size(WG_SIZE)
fn back_project(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= params.word_count) {
        return;
    }
    let w = src_words[word];
    var packed = 0u;
    for (var b = 0u; b < 4u; b += 1u) {
        let v = (w >> (8u * b)) & 0xffu;
        packed |= remap[v] << (8u * b);
    }
    dst_words[word] = packed;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_embeds_workgroup_size() {
        let src = pipeline_source(64);
        assert!(src.contains("const WG_SIZE: u32 = 64u;"));
        assert!(src.contains("const BIN_COUNT: u32 = 256u;"));
    }

    #[test]
    fn source_names_all_four_entry_points() {
        let src = pipeline_source(256);
        for entry in [
            ENTRY_HISTOGRAM,
            ENTRY_CUMULATIVE,
            ENTRY_NORMALIZE,
            ENTRY_BACK_PROJECT,
        ] {
            assert!(src.contains(&format!("fn {entry}(")), "missing {entry}");
        }
    }
}
