//! 内容哈希，用于跳过内容未变化的更新

/// 计算内容的 hash（BLAKE3，取前 16 字节）
///
/// 对完整内容计算；任何一个字节的变化都会改变结果。
pub fn calculate_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_detects_single_byte_change() {
        assert_eq!(calculate_hash(b"abc"), calculate_hash(b"abc"));
        assert_ne!(calculate_hash(b"abc"), calculate_hash(b"abd"));

        // 大文件中间任意位置的同长度修改
        let mut large = vec![0u8; 200 * 1024];
        let before = calculate_hash(&large);
        large[40 * 1024] = 0xFF;
        assert_ne!(before, calculate_hash(&large));
    }
}
