//! 调度器作业持久化与执行记录对账
//!
//! 接入方以库形式使用: 构建[`app::Application`], 通过
//! [`app::Application::event_sender`]把调度器生命周期事件交给事件桥,
//! 管理操作(作业一览、立即执行、保留清理)走对应的服务方法。

pub mod app;

pub use app::Application;
