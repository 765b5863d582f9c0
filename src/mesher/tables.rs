//! Lookup tables for the corner classification pass
//!
//! Corner `k` of a cell sits at offset `(k & 1, (k >> 1) & 1, (k >> 2) & 1)` from the cell's
//! minimum corner, so bit `k` of a corner mask tells whether that corner is solid.

/// The two corners of each of the 12 cell edges. Edges 0..4 run along x, 4..8 along y and
/// 8..12 along z
pub const CUBE_EDGES: [[u8; 2]; 12] = [
    [0, 1],
    [2, 3],
    [4, 5],
    [6, 7],
    [0, 2],
    [1, 3],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// For every corner mask, a 12 bit mask of the edges whose corners disagree, i.e. the edges the
/// surface crosses
pub const EDGE_MASKS: [u16; 256] = build_edge_masks();

const fn build_edge_masks() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut mask = 0;
    while mask < 256 {
        let mut edges = 0u16;
        let mut edge = 0;
        while edge < 12 {
            let [a, b] = CUBE_EDGES[edge];
            if (mask >> a) & 1 != (mask >> b) & 1 {
                edges |= 1 << edge;
            }
            edge += 1;
        }
        table[mask] = edges;
        mask += 1;
    }
    table
}

/// Offset of a corner from the cell's minimum corner
#[inline(always)]
pub const fn corner_offset(corner: u8) -> [u32; 3] {
    [
        (corner & 1) as u32,
        ((corner >> 1) & 1) as u32,
        ((corner >> 2) & 1) as u32,
    ]
}

#[test]
fn test_edge_masks() {
    assert_eq!(0, EDGE_MASKS[0]);
    assert_eq!(0, EDGE_MASKS[255]);
    // A single solid corner is crossed by exactly its three edges
    assert_eq!(0b0001_0001_0001, EDGE_MASKS[1]);
    for mask in 0..256 {
        // Flipping every corner crosses the same edges
        assert_eq!(EDGE_MASKS[mask], EDGE_MASKS[255 - mask]);
    }
}

#[test]
fn test_edges_are_axis_aligned() {
    for (i, [a, b]) in CUBE_EDGES.iter().enumerate() {
        let pa = corner_offset(*a);
        let pb = corner_offset(*b);
        let axis = i / 4;
        for k in 0..3 {
            if k == axis {
                assert_eq!(pa[k] + 1, pb[k]);
            } else {
                assert_eq!(pa[k], pb[k]);
            }
        }
    }
}
