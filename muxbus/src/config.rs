//! 节点配置持久化
//!
//! 服务端自身的节点号经注入的键值存储持久化，键固定。
//! 存储后端由使用方提供，这里只定义能力边界与测试用的内存实现。

use std::collections::HashMap;
use std::io;

/// 节点号的存储键（值为单字节，低 7 位有效）
pub const NODE_ID_KEY: &str = "mux.id";

/// 键值持久化能力
pub trait ConfigStore {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn store(&mut self, key: &str, value: &[u8]) -> io::Result<()>;
}

/// 内存实现，供测试与无持久化场景使用
#[derive(Debug, Default)]
pub struct MemStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemStore {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, value: &[u8]) -> io::Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_roundtrip() {
        let mut store = MemStore::new();
        assert_eq!(store.load(NODE_ID_KEY).unwrap(), None);
        store.store(NODE_ID_KEY, &[5]).unwrap();
        assert_eq!(store.load(NODE_ID_KEY).unwrap(), Some(vec![5]));
    }
}
