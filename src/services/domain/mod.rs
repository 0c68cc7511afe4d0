/// 领域层服务模块
/// 握手状态机、心跳服务与状态文件发布

/// 握手状态机
pub mod handshake_service;

/// 心跳服务
pub mod heartbeat_service;

/// 状态文件服务
pub mod status_file_service;


// 重新导出常用类型
pub use handshake_service::{
    ConnectionStatus, ErrorCode, FaultDescriptor, HandshakeState, HandshakeStateMachine,
    StatusCallback,
};
pub use heartbeat_service::HeartbeatService;
pub use status_file_service::{StatusDocument, StatusFileService};
