/// 计算两组 u64 打包的位向量的汉明距离，长度不同时只比较公共部分
#[inline(always)]
pub fn hamming(va: &[u64], vb: &[u64]) -> u32 {
    match (va.len(), vb.len()) {
        (4, 4) => hamming_256(va, vb),
        _ => hamming_naive(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive(va: &[u64], vb: &[u64]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

/// 默认 16x16 指纹的展开版本
#[inline(always)]
pub fn hamming_256(va: &[u64], vb: &[u64]) -> u32 {
    (va[0] ^ vb[0]).count_ones()
        + (va[1] ^ vb[1]).count_ones()
        + (va[2] ^ vb[2]).count_ones()
        + (va[3] ^ vb[3]).count_ones()
}

/// knn 一次最多返回的数量
pub const KNN_MAX: usize = 8;

/// 计算向量 va 和若干向量的汉明距离，并返回距离最小的 k 个 (索引, 距离)，按距离升序
///
/// 距离相同时索引小的在前。
pub fn knn_hamming<'a>(
    va: &[u64],
    vb: impl IntoIterator<Item = &'a [u64]>,
    k: usize,
) -> Vec<(usize, u32)> {
    knn_select(vb.into_iter().map(|code| hamming(va, code)), k)
}

/// 从已经算好的距离中选出最小的 k 个 (索引, 距离)，按距离升序
pub fn knn_select(distances: impl IntoIterator<Item = u32>, k: usize) -> Vec<(usize, u32)> {
    assert!(k <= KNN_MAX, "k must be less than 8");
    let mut dis = [u32::MAX; KNN_MAX];
    let mut idx = [0; KNN_MAX];
    for (i, d) in distances.into_iter().enumerate() {
        if k == 0 || d >= dis[KNN_MAX - k] {
            continue;
        }
        // 此处维护一个长度为 K 的单调递减数组
        // 插入时，将前面的元素向左移动，保证最大的元素在前面
        for j in (KNN_MAX - k..KNN_MAX).rev() {
            if d < dis[j] {
                dis[KNN_MAX - k..=j].rotate_left(1);
                dis[j] = d;
                idx[KNN_MAX - k..=j].rotate_left(1);
                idx[j] = i;
                break;
            }
        }
    }
    idx.into_iter().zip(dis).filter(|(_, d)| *d != u32::MAX).rev().take(k).collect()
}
