//! Barrier 自动计算
//!
//! 按声明顺序模拟每个执行点对资源的访问，只在真正存在
//! 写冲突（RAW / WAR / WAW）或 layout 变换的边界上生成 barrier。
//! 只读与只读之间不会产生 barrier；一次写入之后的多个读取，
//! 只要已经被某次 barrier 的 (stage, access) 覆盖，就不再重复生成。

use std::collections::HashMap;

use ash::vk;

use crate::access::{AccessState, ResourceId};

/// 访问目标的具体句柄，用于把 barrier 落到 vk 结构上
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessTarget {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Image {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layout: vk::ImageLayout,
    },
    /// 加速结构没有自己的 barrier 结构，使用全局 memory barrier
    Tlas,
}

/// 一个执行点对一个资源的一次访问
#[derive(Clone, Copy, Debug)]
pub struct ResourceAccess {
    pub id: ResourceId,
    pub target: AccessTarget,
    pub state: AccessState,
}

/// 一个执行点：pass 的 pre-op（zero）、主体（dispatch/trace/draw）或 post-op（copy）
///
/// 把 pass 拆成最多三个执行点，pass 内部 transfer op 与着色器之间的
/// 同步就能和跨 pass 同步走同一套计算
#[derive(Clone, Debug)]
pub struct SyncStep {
    pub pass_index: usize,
    pub accesses: Vec<ResourceAccess>,
}

/// 计算出的 buffer barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrierDesc {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src: AccessState,
    pub dst: AccessState,
}

/// 计算出的 image barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrierDesc {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src: AccessState,
    pub dst: AccessState,
}

/// 计算出的全局 memory barrier（加速结构）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBarrierDesc {
    pub src: AccessState,
    pub dst: AccessState,
}

/// 单个执行点之前需要录制的全部 barrier
#[derive(Clone, Debug, Default)]
pub struct StepBarriers {
    pub buffer_barriers: Vec<BufferBarrierDesc>,
    pub image_barriers: Vec<ImageBarrierDesc>,
    pub memory_barriers: Vec<MemoryBarrierDesc>,
}

impl StepBarriers {
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty() && self.memory_barriers.is_empty()
    }

    pub fn barrier_count(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len() + self.memory_barriers.len()
    }
}

/// 整帧的同步计划，与 steps 一一对应
#[derive(Clone, Debug, Default)]
pub struct SyncPlan {
    pub steps: Vec<StepBarriers>,
}

impl SyncPlan {
    pub fn total_barrier_count(&self) -> usize {
        self.steps.iter().map(StepBarriers::barrier_count).sum()
    }
}

/// 每个资源的访问跟踪
struct ResourceTrack {
    /// 最近一次写入
    last_write: Option<AccessState>,
    /// 最近一次写入之后，已经对哪些 (stage, access) 可见
    visible: AccessState,
    /// image 当前所处的 layout
    layout: vk::ImageLayout,
    layout_known: bool,
}

impl ResourceTrack {
    fn new() -> Self {
        Self {
            last_write: None,
            visible: AccessState::NONE,
            layout: vk::ImageLayout::UNDEFINED,
            layout_known: false,
        }
    }
}

/// Barrier 计算器
///
/// 声明顺序就是执行顺序，不做任何重排
pub struct BarrierPlanner;

impl BarrierPlanner {
    pub fn plan(steps: &[SyncStep]) -> SyncPlan {
        let mut tracks: HashMap<ResourceId, ResourceTrack> = HashMap::new();
        let mut plan = SyncPlan::default();

        for step in steps {
            let mut barriers = StepBarriers::default();

            for access in &step.accesses {
                let track = tracks.entry(access.id).or_insert_with(ResourceTrack::new);
                Self::plan_access(track, access, &mut barriers);
            }

            plan.steps.push(barriers);
        }

        plan
    }

    fn plan_access(track: &mut ResourceTrack, access: &ResourceAccess, barriers: &mut StepBarriers) {
        let wanted = access.state;

        // image layout 变化时，即使 read -> read 也必须 barrier
        let layout_change = match access.target {
            AccessTarget::Image { layout, .. } => track.layout_known && track.layout != layout,
            _ => false,
        };

        let needed = if wanted.is_write() {
            // WAR / WAW：只要此前有任何访问，就需要一次 barrier；
            // src 是上一次写入与其后所有读取的并集
            let src = match track.last_write {
                Some(write) => Some(write.merge(track.visible)),
                None if !track.visible.is_none() => Some(track.visible),
                None => None,
            };
            src.map(|src| (src, wanted))
        } else {
            // RAW：只有上一次写入还没对 (stage, access) 可见时才需要 barrier
            match track.last_write {
                Some(write) if !track.visible.covers(&wanted) => Some((write, wanted)),
                Some(_) | None => None,
            }
        };

        let needed = match (needed, layout_change) {
            (Some(masks), _) => Some(masks),
            (None, true) => {
                // 纯 layout 变换：src 取目前可见的访问集合
                let src = track.last_write.map_or(track.visible, |w| w.merge(track.visible));
                Some((src, wanted))
            }
            (None, false) => None,
        };

        if let Some((src, dst)) = needed {
            match access.target {
                AccessTarget::Buffer { buffer, offset, size } => {
                    barriers.buffer_barriers.push(BufferBarrierDesc { buffer, offset, size, src, dst });
                }
                AccessTarget::Image { image, aspect, layout } => {
                    barriers.image_barriers.push(ImageBarrierDesc {
                        image,
                        aspect,
                        old_layout: if track.layout_known { track.layout } else { layout },
                        new_layout: layout,
                        src,
                        dst,
                    });
                }
                AccessTarget::Tlas => {
                    barriers.memory_barriers.push(MemoryBarrierDesc { src, dst });
                }
            }
        }

        // 更新跟踪状态
        if let AccessTarget::Image { layout, .. } = access.target {
            track.layout = layout;
            track.layout_known = true;
        }
        if wanted.is_write() {
            track.last_write = Some(wanted);
            // 写入者自身对自己可见
            track.visible = wanted;
        } else if needed.is_some() || track.last_write.is_none() {
            track.visible = track.visible.merge(wanted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer_access(addr: u64, state: AccessState) -> ResourceAccess {
        ResourceAccess {
            id: ResourceId(addr),
            target: AccessTarget::Buffer {
                buffer: vk::Buffer::from_raw(addr),
                offset: 0,
                size: vk::WHOLE_SIZE,
            },
            state,
        }
    }

    fn step(pass_index: usize, accesses: Vec<ResourceAccess>) -> SyncStep {
        SyncStep { pass_index, accesses }
    }

    #[test]
    fn test_empty_plan() {
        let plan = BarrierPlanner::plan(&[]);
        assert_eq!(plan.total_barrier_count(), 0);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_disjoint_passes_no_barrier() {
        // 两个 pass 写不同的 buffer，没有共享资源
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(2, AccessState::STORAGE_WRITE_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 0);
    }

    #[test]
    fn test_read_read_no_barrier() {
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 1);

        let barrier = &plan.steps[1].buffer_barriers[0];
        assert_eq!(barrier.src, AccessState::STORAGE_WRITE_COMPUTE);
        assert_eq!(barrier.dst, AccessState::STORAGE_READ_COMPUTE);
    }

    #[test]
    fn test_covered_reads_deduplicated() {
        // 一次写入，三个相同 (stage, access) 的读取：只有第一个读取需要 barrier
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
            step(2, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
            step(3, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 1);
    }

    #[test]
    fn test_uncovered_read_gets_own_barrier() {
        // 写入之后，compute 读取与 ray tracing 读取的 stage 不同，各需要一次 barrier
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
            step(2, vec![buffer_access(1, AccessState::STORAGE_READ_RAY_TRACING)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 2);
    }

    #[test]
    fn test_write_after_read() {
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_READ_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 1);

        let barrier = &plan.steps[1].buffer_barriers[0];
        assert_eq!(barrier.src, AccessState::STORAGE_READ_COMPUTE);
    }

    #[test]
    fn test_write_after_write() {
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 1);
    }

    #[test]
    fn test_war_src_includes_readers() {
        // 写入 -> 读取 -> 再写入：第二次写入的 src 要包含中间的读取
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(1, vec![buffer_access(1, AccessState::STORAGE_READ_RAY_TRACING)]),
            step(2, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 2);

        let barrier = &plan.steps[2].buffer_barriers[0];
        assert!(barrier.src.stage.contains(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR));
        assert!(barrier.src.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn test_image_layout_change_forces_barrier() {
        let image_access = |layout, state| ResourceAccess {
            id: ResourceId(99),
            target: AccessTarget::Image {
                image: vk::Image::from_raw(99),
                aspect: vk::ImageAspectFlags::COLOR,
                layout,
            },
            state,
        };

        // 两次只读访问，但 layout 不同，必须 barrier
        let steps = vec![
            step(0, vec![image_access(vk::ImageLayout::GENERAL, AccessState::STORAGE_READ_COMPUTE)]),
            step(1, vec![image_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, AccessState::SHADER_READ_FRAGMENT)]),
        ];
        let plan = BarrierPlanner::plan(&steps);
        assert_eq!(plan.total_barrier_count(), 1);

        let barrier = &plan.steps[1].image_barriers[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    /// 两个 pass 的典型场景：A 写 X，B 读 X 写 Y
    ///
    /// 期望 X 上恰好一个同步点，Y 上没有
    #[test]
    fn test_two_pass_pipeline() {
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(
                1,
                vec![
                    buffer_access(1, AccessState::STORAGE_READ_COMPUTE),
                    buffer_access(2, AccessState::STORAGE_WRITE_COMPUTE),
                ],
            ),
        ];
        let plan = BarrierPlanner::plan(&steps);

        assert_eq!(plan.steps[0].barrier_count(), 0);
        assert_eq!(plan.steps[1].barrier_count(), 1);
        assert_eq!(plan.steps[1].buffer_barriers[0].buffer, vk::Buffer::from_raw(1));
    }

    /// 在 CPU 上按计划好的顺序重放，与直接顺序求值结果一致
    #[test]
    fn test_plan_replay_matches_sequential_eval() {
        // pass A: x = 7; pass B: y = x * 3
        let steps = vec![
            step(0, vec![buffer_access(1, AccessState::STORAGE_WRITE_COMPUTE)]),
            step(
                1,
                vec![
                    buffer_access(1, AccessState::STORAGE_READ_COMPUTE),
                    buffer_access(2, AccessState::STORAGE_WRITE_COMPUTE),
                ],
            ),
        ];
        let plan = BarrierPlanner::plan(&steps);

        // 计划不会增删执行点，只会在边界插入同步
        assert_eq!(plan.steps.len(), steps.len());

        let mut x = 0u64;
        let mut y = 0u64;
        for (idx, _barriers) in plan.steps.iter().enumerate() {
            match steps[idx].pass_index {
                0 => x = 7,
                1 => y = x * 3,
                _ => unreachable!(),
            }
        }
        assert_eq!((x, y), (7, 21));
    }
}
