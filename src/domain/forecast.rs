// ==========================================
// 预测立方体 - 预测节点与注册表
// ==========================================
// 预测节点把一个 (item, location, customer) 三元组与其节点级
// 配置绑定。注册表按名称三元组维持节点有序，并为层级的上层
// 按需合成聚合节点。
// ==========================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::hierarchy::Dimension;
use crate::domain::types::{method_flags, ForecastId, NodeId};

/// 注册表节点的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastKind {
    /// 显式创建的节点，可参与计划
    Forecast,
    /// 为上层合成的汇总节点
    Aggregated,
}

/// 预测格点阵中的一个节点
#[derive(Debug)]
pub struct ForecastNode {
    pub id: ForecastId,
    pub name: String,
    pub item: NodeId,
    pub location: NodeId,
    pub customer: NodeId,
    pub kind: ForecastKind,
    pub discrete: bool,
    planned: AtomicBool,
    methods: AtomicU8,
    /// 结构性叶子判定的缓存: -1 未知，0 否，1 是
    leaf_cache: AtomicI8,
}

impl ForecastNode {
    pub fn planned(&self) -> bool {
        self.planned.load(Ordering::Relaxed)
    }

    pub fn set_planned(&self, value: bool) {
        self.planned.store(value, Ordering::Relaxed);
    }

    pub fn methods(&self) -> u8 {
        self.methods.load(Ordering::Relaxed)
    }

    pub fn set_methods(&self, value: u8) {
        self.methods.store(value, Ordering::Relaxed);
    }

    pub(crate) fn cached_leaf(&self) -> Option<bool> {
        match self.leaf_cache.load(Ordering::Relaxed) {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    pub(crate) fn cache_leaf(&self, value: bool) {
        self.leaf_cache.store(if value { 1 } else { 0 }, Ordering::Relaxed);
    }

    fn invalidate_leaf(&self) {
        self.leaf_cache.store(-1, Ordering::Relaxed);
    }
}

/// 显式创建预测的定义
#[derive(Debug, Clone)]
pub struct ForecastDefinition {
    pub name: String,
    pub item: NodeId,
    pub location: NodeId,
    pub customer: NodeId,
    pub planned: bool,
    pub discrete: bool,
    pub methods: u8,
}

impl ForecastDefinition {
    pub fn new(name: &str, item: NodeId, location: NodeId, customer: NodeId) -> Self {
        ForecastDefinition {
            name: name.to_string(),
            item,
            location,
            customer,
            planned: true,
            discrete: true,
            methods: method_flags::ALL,
        }
    }
}

/// 预测节点的有序集合
#[derive(Default)]
pub struct ForecastRegistry {
    nodes: Vec<Arc<ForecastNode>>,
    index: BTreeMap<(String, String, String), ForecastId>,
}

impl ForecastRegistry {
    fn key(
        &self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        item: NodeId,
        location: NodeId,
        customer: NodeId,
    ) -> (String, String, String) {
        (
            items.node_name(item).to_string(),
            locations.node_name(location).to_string(),
            customers.node_name(customer).to_string(),
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ForecastId) -> Arc<ForecastNode> {
        Arc::clone(&self.nodes[id as usize])
    }

    pub fn nodes(&self) -> &[Arc<ForecastNode>] {
        &self.nodes
    }

    pub fn ids(&self) -> impl Iterator<Item = ForecastId> + '_ {
        0..self.nodes.len() as ForecastId
    }

    pub fn find(
        &self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        item: NodeId,
        location: NodeId,
        customer: NodeId,
    ) -> Option<ForecastId> {
        self.index
            .get(&self.key(items, locations, customers, item, location, customer))
            .copied()
    }

    /// 注册一个显式定义的预测
    ///
    /// 三元组已被聚合节点占用时原地接管（id 保持稳定）；
    /// 已被另一个显式预测占用则属数据错误。
    pub fn create(
        &mut self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        def: ForecastDefinition,
    ) -> ForecastResult<ForecastId> {
        let key = self.key(items, locations, customers, def.item, def.location, def.customer);
        if let Some(&existing) = self.index.get(&key) {
            let node = &self.nodes[existing as usize];
            if node.kind == ForecastKind::Aggregated {
                // 原地替换已合成的聚合节点
                debug!(name = %def.name, "replacing aggregate node with explicit forecast");
                let replacement = Arc::new(ForecastNode {
                    id: existing,
                    name: def.name,
                    item: def.item,
                    location: def.location,
                    customer: def.customer,
                    kind: ForecastKind::Forecast,
                    discrete: def.discrete,
                    planned: AtomicBool::new(def.planned),
                    methods: AtomicU8::new(def.methods),
                    leaf_cache: AtomicI8::new(-1),
                });
                self.nodes[existing as usize] = replacement;
                self.invalidate_leaf_caches();
                return Ok(existing);
            }
            return Err(ForecastError::Data(
                "duplicate forecast for item, location and customer".to_string(),
            ));
        }
        let id = self.push(ForecastNode {
            id: self.nodes.len() as ForecastId,
            name: def.name,
            item: def.item,
            location: def.location,
            customer: def.customer,
            kind: ForecastKind::Forecast,
            discrete: def.discrete,
            planned: AtomicBool::new(def.planned),
            methods: AtomicU8::new(def.methods),
            leaf_cache: AtomicI8::new(-1),
        });
        self.index.insert(key, id);
        self.invalidate_leaf_caches();
        Ok(id)
    }

    /// 查找三元组对应的节点，不存在时合成聚合节点
    pub fn find_or_create_aggregate(
        &mut self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        item: NodeId,
        location: NodeId,
        customer: NodeId,
    ) -> ForecastId {
        let key = self.key(items, locations, customers, item, location, customer);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let name = format!("{} / {} / {}", key.0, key.1, key.2);
        let id = self.push(ForecastNode {
            id: self.nodes.len() as ForecastId,
            name,
            item,
            location,
            customer,
            kind: ForecastKind::Aggregated,
            discrete: false,
            planned: AtomicBool::new(false),
            methods: AtomicU8::new(0),
            leaf_cache: AtomicI8::new(-1),
        });
        self.index.insert(key, id);
        self.invalidate_leaf_caches();
        id
    }

    fn push(&mut self, node: ForecastNode) -> ForecastId {
        let id = node.id;
        self.nodes.push(Arc::new(node));
        id
    }

    fn invalidate_leaf_caches(&self) {
        for n in &self.nodes {
            n.invalidate_leaf();
        }
    }

    /// 结构性叶子判定: 物料、地点、客户三个子树内都没有
    /// 其他节点时该节点为叶子。
    pub fn is_structural_leaf(
        &self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        id: ForecastId,
    ) -> bool {
        let node = &self.nodes[id as usize];
        if let Some(cached) = node.cached_leaf() {
            return cached;
        }
        let mut leaf = true;
        for other in &self.nodes {
            if other.id == id {
                continue;
            }
            if items.is_member_of(other.item, node.item)
                && locations.is_member_of(other.location, node.location)
                && customers.is_member_of(other.customer, node.customer)
            {
                leaf = false;
                break;
            }
        }
        node.cache_leaf(leaf);
        leaf
    }

    /// 节点的所有上级三元组，按需合成聚合节点
    ///
    /// 客户链变化最快，物料链最慢；不含节点自身的三元组。
    pub fn parents(
        &mut self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        id: ForecastId,
    ) -> Vec<ForecastId> {
        let (item, location, customer) = {
            let node = &self.nodes[id as usize];
            (node.item, node.location, node.customer)
        };
        let item_chain = items.owner_chain(item);
        let location_chain = locations.owner_chain(location);
        let customer_chain = customers.owner_chain(customer);
        let mut out = Vec::new();
        for &i in &item_chain {
            for &l in &location_chain {
                for &c in &customer_chain {
                    if i == item && l == location && c == customer {
                        continue;
                    }
                    out.push(self.find_or_create_aggregate(items, locations, customers, i, l, c));
                }
            }
        }
        out
    }

    /// `root` 各子树内的已注册节点，叶子谓词由调用方决定
    pub fn leaves_filtered<F>(
        &self,
        items: &Dimension,
        locations: &Dimension,
        customers: &Dimension,
        root: ForecastId,
        inclusive: bool,
        mut is_leaf: F,
    ) -> Vec<ForecastId>
    where
        F: FnMut(&ForecastNode) -> bool,
    {
        let root_node = &self.nodes[root as usize];
        let mut out = Vec::new();
        for candidate in &self.nodes {
            if !inclusive && candidate.id == root {
                continue;
            }
            if items.is_member_of(candidate.item, root_node.item)
                && locations.is_member_of(candidate.location, root_node.location)
                && customers.is_member_of(candidate.customer, root_node.customer)
                && is_leaf(candidate)
            {
                out.push(candidate.id);
            }
        }
        out
    }

    /// 引用某个物料节点的全部预测节点
    pub fn nodes_for_item(&self, item: NodeId) -> Vec<ForecastId> {
        self.nodes
            .iter()
            .filter(|n| n.item == item)
            .map(|n| n.id)
            .collect()
    }
}
