// ==========================================
// 机加工车间排产系统 - 机台领域模型
// ==========================================
// 职责: 机台主数据与机台组 (可替代关系)
// ==========================================

use crate::domain::types::OperationKind;
use serde::{Deserialize, Serialize};

// ==========================================
// Machine - 机台
// ==========================================
// 对齐: machine 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,                // 机台ID
    pub machine_group_id: Option<String>,  // 所属机台组
    pub name: String,                      // 机台名称
    pub efficiency: f64,                   // 效率系数 (1.0 为基准, 越大越快)
    pub is_inspection: bool,               // 是否为检验台
    pub active: bool,                      // 启用标志
}

impl Machine {
    /// 机台与工序类型是否兼容
    ///
    /// 检验工序只能上检验台, 非检验工序不能占用检验台
    pub fn compatible_with(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Inspection => self.is_inspection,
            _ => !self.is_inspection,
        }
    }
}

// ==========================================
// MachineGroup - 机台组
// ==========================================
// parent_group_id 构成组层级, 成员查询采用有界迭代展开
// 对齐: machine_group 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineGroup {
    pub group_id: String,
    pub parent_group_id: Option<String>,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(is_inspection: bool) -> Machine {
        Machine {
            machine_id: "m1".to_string(),
            machine_group_id: None,
            name: "test".to_string(),
            efficiency: 1.0,
            is_inspection,
            active: true,
        }
    }

    #[test]
    fn test_compatibility() {
        assert!(machine(false).compatible_with(OperationKind::Normal));
        assert!(!machine(false).compatible_with(OperationKind::Inspection));
        assert!(machine(true).compatible_with(OperationKind::Inspection));
        assert!(!machine(true).compatible_with(OperationKind::Normal));
    }
}
