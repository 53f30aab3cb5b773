// ==========================================
// 预测立方体 - 维度层级
// ==========================================
// 职责: 物料 / 地点 / 客户三棵树
// 每个维度一个 arena，节点之间按下标引用；模型构建完成后
// arena 即冻结。
// ==========================================

use std::collections::HashMap;

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::NodeId;

/// 维度树中的一个节点
#[derive(Debug, Clone)]
pub struct DimensionNode {
    pub name: String,
    pub owner: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// 单位成本，暴露给计算型度量表达式
    /// 仅对物料维度有意义
    pub cost: f64,
}

/// 单个维度的层级节点 arena
#[derive(Debug, Default)]
pub struct Dimension {
    name: String,
    nodes: Vec<DimensionNode>,
    index: HashMap<String, NodeId>,
}

impl Dimension {
    pub fn new(name: &str) -> Self {
        Dimension {
            name: name.to_string(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 在可选的上级下添加节点，重复添加同名节点时返回已有节点
    pub fn add(&mut self, name: &str, owner: Option<NodeId>) -> ForecastResult<NodeId> {
        if let Some(&id) = self.index.get(name) {
            return Ok(id);
        }
        if let Some(o) = owner {
            if o as usize >= self.nodes.len() {
                return Err(ForecastError::Data(format!(
                    "unknown owner node {} in dimension {}",
                    o, self.name
                )));
            }
        }
        let id = self.nodes.len() as NodeId;
        self.nodes.push(DimensionNode {
            name: name.to_string(),
            owner,
            children: Vec::new(),
            cost: 0.0,
        });
        if let Some(o) = owner {
            self.nodes[o as usize].children.push(id);
        }
        self.index.insert(name.to_string(), id);
        Ok(id)
    }

    /// 添加节点并设置其成本属性
    pub fn add_with_cost(
        &mut self,
        name: &str,
        owner: Option<NodeId>,
        cost: f64,
    ) -> ForecastResult<NodeId> {
        let id = self.add(name, owner)?;
        self.nodes[id as usize].cost = cost;
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &DimensionNode {
        &self.nodes[id as usize]
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.nodes[id as usize].name
    }

    pub fn owner(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id as usize].owner
    }

    /// 自反的祖先判定: `node` 是否在 `root` 的子树内
    pub fn is_member_of(&self, node: NodeId, root: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(c) = cursor {
            if c == root {
                return true;
            }
            cursor = self.nodes[c as usize].owner;
        }
        false
    }

    /// 从节点到其顶层祖先的链，两端均含
    pub fn owner_chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = vec![node];
        let mut cursor = self.nodes[node as usize].owner;
        while let Some(c) = cursor {
            chain.push(c);
            cursor = self.nodes[c as usize].owner;
        }
        chain
    }

    /// 以 `root` 为根的子树先序遍历，含根本身
    pub fn members_recursive(&self, root: NodeId) -> MemberIterator<'_> {
        MemberIterator {
            dimension: self,
            stack: vec![root],
        }
    }
}

/// 子树的深度优先迭代器
pub struct MemberIterator<'a> {
    dimension: &'a Dimension,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for MemberIterator<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        for &ch in self.dimension.nodes[id as usize].children.iter().rev() {
            self.stack.push(ch);
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dimension {
        let mut d = Dimension::new("item");
        let all = d.add("All items", None).unwrap();
        let shirts = d.add("Shirts", Some(all)).unwrap();
        d.add("Blue shirt", Some(shirts)).unwrap();
        d.add("Red shirt", Some(shirts)).unwrap();
        d.add("Trousers", Some(all)).unwrap();
        d
    }

    #[test]
    fn membership_is_reflexive_and_transitive() {
        let d = sample();
        let all = d.find("All items").unwrap();
        let blue = d.find("Blue shirt").unwrap();
        let trousers = d.find("Trousers").unwrap();
        assert!(d.is_member_of(blue, all));
        assert!(d.is_member_of(blue, blue));
        assert!(!d.is_member_of(trousers, d.find("Shirts").unwrap()));
    }

    #[test]
    fn recursive_members_walk_the_whole_subtree() {
        let d = sample();
        let shirts = d.find("Shirts").unwrap();
        let names: Vec<&str> = d
            .members_recursive(shirts)
            .map(|id| d.node_name(id))
            .collect();
        assert_eq!(names, vec!["Shirts", "Blue shirt", "Red shirt"]);
    }

    #[test]
    fn owner_chain_runs_to_the_root() {
        let d = sample();
        let blue = d.find("Blue shirt").unwrap();
        let chain: Vec<&str> = d.owner_chain(blue).iter().map(|&id| d.node_name(id)).collect();
        assert_eq!(chain, vec!["Blue shirt", "Shirts", "All items"]);
    }
}
