// ==========================================
// 受益人登记系统 - 批内唯一性检查
// ==========================================
// 职责: 对每个唯一性字段计算“值在批内出现 ≥2 次”的行集合
// 复杂度: 每字段两遍扫描 O(n)，结果供 SchemaValidator 逐行查表
// 口径: null 与 null 视为相等；行内缺少该字段时不参与统计
// ==========================================

use crate::domain::upload::RowPayload;
use std::collections::{HashMap, HashSet};

/// 唯一性检查结果（字段 → 重复行下标集合）
#[derive(Debug, Clone, Default)]
pub struct UniquenessReport {
    duplicates: HashMap<String, HashSet<usize>>,
}

impl UniquenessReport {
    /// 第 row_index 行在 field 上是否重复
    pub fn is_duplicate(&self, field: &str, row_index: usize) -> bool {
        self.duplicates
            .get(field)
            .map(|set| set.contains(&row_index))
            .unwrap_or(false)
    }

    pub fn duplicate_count(&self, field: &str) -> usize {
        self.duplicates.get(field).map(|s| s.len()).unwrap_or(0)
    }
}

pub struct UniquenessChecker;

impl UniquenessChecker {
    pub fn compute<'a>(
        rows: &[&RowPayload],
        unique_fields: impl IntoIterator<Item = &'a str>,
    ) -> UniquenessReport {
        let mut duplicates = HashMap::new();

        for field in unique_fields {
            // 第一遍：计数（以规范化 JSON 文本为键）
            let mut counts: HashMap<String, usize> = HashMap::new();
            let keys: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(field).map(|v| v.to_string()))
                .collect();
            for key in keys.iter().flatten() {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }

            // 第二遍：收集出现 ≥2 次的行
            let members: HashSet<usize> = keys
                .iter()
                .enumerate()
                .filter_map(|(idx, key)| {
                    key.as_ref()
                        .filter(|k| counts.get(*k).copied().unwrap_or(0) >= 2)
                        .map(|_| idx)
                })
                .collect();

            duplicates.insert(field.to_string(), members);
        }

        UniquenessReport { duplicates }
    }
}
