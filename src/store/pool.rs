// ==========================================
// 预测立方体 - 池化度量存储
// ==========================================
// 所有立方体所有桶的稀疏 (measure, value) 对都从两个共享池
// 分配: "default" 存常规度量，"temp" 存短生命周期的聚合校验
// 度量。池是按页增长的下标式 arena；释放的槽位通过与桶内
// 链表相同的 prev/next 字段串入全池空闲链表。
// ==========================================

use std::sync::{Mutex, MutexGuard};

use tracing::{error, info};

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::MeasureId;

/// 每页槽位数
pub const PAGE_SIZE: usize = 512;

/// 空槽位下标
pub const NIL: u32 = u32::MAX;

/// 度量池中的一个槽位
///
/// `msr == MeasureId::NONE` 的槽位为空闲，其 prev/next 串的是
/// 池的空闲链表；否则串的是所属桶的度量链表。
#[derive(Debug, Clone, Copy)]
pub struct MeasureValue {
    pub msr: MeasureId,
    pub val: f64,
    prev: u32,
    next: u32,
}

const FREE_SLOT: MeasureValue = MeasureValue {
    msr: MeasureId::NONE,
    val: 0.0,
    prev: NIL,
    next: NIL,
};

/// 池的使用率快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub pages: usize,
    pub used_slots: usize,
    pub free_slots: usize,
}

/// 下标式的度量槽位 arena
pub struct MeasurePool {
    name: &'static str,
    slots: Vec<MeasureValue>,
    first_free: u32,
    last_free: u32,
}

impl MeasurePool {
    pub fn new(name: &'static str) -> Self {
        MeasurePool {
            name,
            slots: Vec::new(),
            first_free: NIL,
            last_free: NIL,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn slot(&self, idx: u32) -> &MeasureValue {
        &self.slots[idx as usize]
    }

    fn slot_mut(&mut self, idx: u32) -> &mut MeasureValue {
        &mut self.slots[idx as usize]
    }

    /// 追加一页空闲槽位
    fn grow(&mut self) -> ForecastResult<()> {
        let base = self.slots.len();
        if base + PAGE_SIZE >= NIL as usize {
            return Err(ForecastError::Resource(format!(
                "measure pool '{}' exhausted",
                self.name
            )));
        }
        self.slots.reserve(PAGE_SIZE);
        for _ in 0..PAGE_SIZE {
            self.slots.push(FREE_SLOT);
        }
        for i in base..base + PAGE_SIZE {
            self.push_free(i as u32);
        }
        Ok(())
    }

    /// 把槽位追加到空闲链表尾部
    fn push_free(&mut self, idx: u32) {
        let last = self.last_free;
        {
            let s = self.slot_mut(idx);
            s.msr = MeasureId::NONE;
            s.val = 0.0;
            s.prev = last;
            s.next = NIL;
        }
        if last != NIL {
            self.slot_mut(last).next = idx;
        } else {
            self.first_free = idx;
        }
        self.last_free = idx;
    }

    /// 从空闲链表中摘除指定槽位
    fn unlink_free(&mut self, idx: u32) {
        let (prev, next) = {
            let s = self.slot(idx);
            (s.prev, s.next)
        };
        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else {
            self.first_free = next;
        }
        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else {
            self.last_free = prev;
        }
    }

    /// 取一个空闲槽位，必要时扩容
    fn allocate(&mut self) -> ForecastResult<u32> {
        if self.first_free == NIL {
            self.grow()?;
        }
        let idx = self.first_free;
        let next = self.slot(idx).next;
        self.first_free = next;
        if next != NIL {
            self.slot_mut(next).prev = NIL;
        } else {
            self.last_free = NIL;
        }
        Ok(idx)
    }

    /// 释放尾部全空闲的页
    ///
    /// 只有 arena 的尾部会收缩: 中间被清空的页要等它后面的
    /// 页全部空闲后才能释放，因为度量链表持有的槽位下标不能
    /// 移动。这些空闲槽位仍留在空闲链表里，后续插入会先复用
    /// 它们再扩容。
    ///
    /// 返回归还的页数。
    pub fn release_empty_pages(&mut self) -> usize {
        let mut released = 0;
        loop {
            let len = self.slots.len();
            if len < PAGE_SIZE {
                break;
            }
            let base = len - PAGE_SIZE;
            if self.slots[base..].iter().any(|s| s.msr != MeasureId::NONE) {
                break;
            }
            for idx in base..len {
                self.unlink_free(idx as u32);
            }
            self.slots.truncate(base);
            released += 1;
        }
        info!(pool = self.name, released, "released measure pool pages");
        released
    }

    /// 使用率统计
    pub fn status(&self) -> PoolStatus {
        let free_slots = self.slots.iter().filter(|s| s.msr == MeasureId::NONE).count();
        PoolStatus {
            pages: self.slots.len() / PAGE_SIZE,
            used_slots: self.slots.len() - free_slots,
            free_slots,
        }
    }

    /// 校验空闲链表与槽位标记一致
    pub fn check(&self) -> ForecastResult<()> {
        let mut listed = 0usize;
        let mut cursor = self.first_free;
        while cursor != NIL {
            let s = self.slot(cursor);
            if s.msr != MeasureId::NONE {
                error!(pool = self.name, slot = cursor, "used slot on the free list");
                return Err(ForecastError::Logic(format!(
                    "corrupted free list in pool '{}'",
                    self.name
                )));
            }
            listed += 1;
            cursor = s.next;
        }
        let flagged = self.slots.iter().filter(|s| s.msr == MeasureId::NONE).count();
        if listed != flagged {
            error!(
                pool = self.name,
                listed, flagged, "free list length does not match free slot count"
            );
            return Err(ForecastError::Logic(format!(
                "corrupted free list in pool '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

// ==========================================
// 按桶的度量链表
// ==========================================

/// 池内 (measure, value) 对的双向链表
///
/// 链表本身只是一对槽位下标，所有操作都需传入所属池。
#[derive(Debug, Clone, Copy)]
pub struct MeasureList {
    first: u32,
    last: u32,
}

impl Default for MeasureList {
    fn default() -> Self {
        MeasureList::new()
    }
}

impl MeasureList {
    pub fn new() -> Self {
        MeasureList { first: NIL, last: NIL }
    }

    pub fn is_empty(&self) -> bool {
        self.first == NIL
    }

    /// 某个 key 的槽位下标（如存在）
    pub fn find(&self, pool: &MeasurePool, key: MeasureId) -> Option<u32> {
        let mut cursor = self.first;
        while cursor != NIL {
            let s = pool.slot(cursor);
            if s.msr == key {
                return Some(cursor);
            }
            cursor = s.next;
        }
        None
    }

    /// 某个 key 的值，不存在时返回给定默认值
    pub fn value(&self, pool: &MeasurePool, key: MeasureId, default: f64) -> f64 {
        match self.find(pool, key) {
            Some(idx) => pool.slot(idx).val,
            None => default,
        }
    }

    /// 值以及 key 是否存在的标志
    pub fn value_and_found(
        &self,
        pool: &MeasurePool,
        key: MeasureId,
        default: f64,
    ) -> (f64, bool) {
        match self.find(pool, key) {
            Some(idx) => (pool.slot(idx).val, true),
            None => (default, false),
        }
    }

    pub fn slot_value(&self, pool: &MeasurePool, idx: u32) -> f64 {
        pool.slot(idx).val
    }

    pub fn set_slot_value(&mut self, pool: &mut MeasurePool, idx: u32, val: f64) {
        pool.slot_mut(idx).val = val;
    }

    /// 追加一对；`check_existing` 时已有 key 原地更新
    pub fn insert(
        &mut self,
        pool: &mut MeasurePool,
        key: MeasureId,
        val: f64,
        check_existing: bool,
    ) -> ForecastResult<()> {
        if check_existing {
            if let Some(idx) = self.find(pool, key) {
                pool.slot_mut(idx).val = val;
                return Ok(());
            }
        }
        let idx = pool.allocate()?;
        let last = self.last;
        {
            let s = pool.slot_mut(idx);
            s.msr = key;
            s.val = val;
            s.prev = last;
            s.next = NIL;
        }
        if last != NIL {
            pool.slot_mut(last).next = idx;
        } else {
            self.first = idx;
        }
        self.last = idx;
        Ok(())
    }

    /// 移除 key（如存在）
    pub fn erase(&mut self, pool: &mut MeasurePool, key: MeasureId) {
        if let Some(idx) = self.find(pool, key) {
            self.erase_slot(pool, idx);
        }
    }

    /// 摘除指定槽位并归还空闲链表
    pub fn erase_slot(&mut self, pool: &mut MeasurePool, idx: u32) {
        let (prev, next) = {
            let s = pool.slot(idx);
            (s.prev, s.next)
        };
        if prev != NIL {
            pool.slot_mut(prev).next = next;
        } else {
            self.first = next;
        }
        if next != NIL {
            pool.slot_mut(next).prev = prev;
        } else {
            self.last = prev;
        }
        pool.push_free(idx);
    }

    /// 移除全部键值对
    pub fn clear(&mut self, pool: &mut MeasurePool) {
        while self.first != NIL {
            let idx = self.first;
            self.erase_slot(pool, idx);
        }
    }

    /// 按度量 id 原地冒泡排序，交换槽位负载
    pub fn sort(&mut self, pool: &mut MeasurePool) {
        loop {
            let mut swapped = false;
            let mut cursor = self.first;
            while cursor != NIL {
                let next = pool.slot(cursor).next;
                if next == NIL {
                    break;
                }
                if pool.slot(next).msr.0 < pool.slot(cursor).msr.0 {
                    let (am, av) = {
                        let s = pool.slot(cursor);
                        (s.msr, s.val)
                    };
                    let (bm, bv) = {
                        let s = pool.slot(next);
                        (s.msr, s.val)
                    };
                    {
                        let s = pool.slot_mut(cursor);
                        s.msr = bm;
                        s.val = bv;
                    }
                    {
                        let s = pool.slot_mut(next);
                        s.msr = am;
                        s.val = av;
                    }
                    swapped = true;
                }
                cursor = next;
            }
            if !swapped {
                break;
            }
        }
    }

    /// 按链表顺序迭代 (measure, value) 对
    pub fn iter<'p>(&self, pool: &'p MeasurePool) -> MeasureListIter<'p> {
        MeasureListIter {
            pool,
            cursor: self.first,
        }
    }

    pub fn len(&self, pool: &MeasurePool) -> usize {
        self.iter(pool).count()
    }

    /// 校验链表前后向一致性
    pub fn check(&self, pool: &MeasurePool) -> ForecastResult<()> {
        let mut forward = 0usize;
        let mut cursor = self.first;
        while cursor != NIL {
            forward += 1;
            cursor = pool.slot(cursor).next;
        }
        let mut backward = 0usize;
        let mut wrong_links = 0usize;
        let mut cursor = self.last;
        while cursor != NIL {
            backward += 1;
            let prev = pool.slot(cursor).prev;
            if prev != NIL && pool.slot(prev).next != cursor {
                wrong_links += 1;
            }
            cursor = prev;
        }
        if forward != backward || wrong_links > 0 {
            error!(forward, backward, wrong_links, "corrupted measure list");
            return Err(ForecastError::Logic("corrupted measure list".to_string()));
        }
        Ok(())
    }
}

/// 度量链表的迭代器
pub struct MeasureListIter<'p> {
    pool: &'p MeasurePool,
    cursor: u32,
}

impl<'p> Iterator for MeasureListIter<'p> {
    type Item = (MeasureId, f64);

    fn next(&mut self) -> Option<(MeasureId, f64)> {
        if self.cursor == NIL {
            return None;
        }
        let s = self.pool.slot(self.cursor);
        self.cursor = s.next;
        Some((s.msr, s.val))
    }
}

// ==========================================
// 池对
// ==========================================

/// 模型的两个共享池
pub struct PoolSet {
    default_pool: Mutex<MeasurePool>,
    temp_pool: Mutex<MeasurePool>,
}

/// 同时获取的两把池锁
///
/// 加锁顺序固定: default 先于 temp，池锁先于任何立方体锁。
pub struct Pools<'a> {
    pub main: MutexGuard<'a, MeasurePool>,
    pub temp: MutexGuard<'a, MeasurePool>,
}

impl PoolSet {
    pub fn new() -> Self {
        PoolSet {
            default_pool: Mutex::new(MeasurePool::new("default")),
            temp_pool: Mutex::new(MeasurePool::new("temp")),
        }
    }

    pub fn lock(&self) -> ForecastResult<Pools<'_>> {
        let main = self
            .default_pool
            .lock()
            .map_err(|_| ForecastError::poisoned("default measure pool"))?;
        let temp = self
            .temp_pool
            .lock()
            .map_err(|_| ForecastError::poisoned("temp measure pool"))?;
        Ok(Pools { main, temp })
    }
}

impl Default for PoolSet {
    fn default() -> Self {
        PoolSet::new()
    }
}

impl<'a> Pools<'a> {
    /// 某个度量从哪个池分配
    pub fn for_measure(&mut self, temporary: bool) -> &mut MeasurePool {
        if temporary {
            &mut self.temp
        } else {
            &mut self.main
        }
    }

    pub fn for_measure_ref(&self, temporary: bool) -> &MeasurePool {
        if temporary {
            &self.temp
        } else {
            &self.main
        }
    }
}
