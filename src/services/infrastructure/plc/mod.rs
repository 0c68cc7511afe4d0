/// PLC通信相关模块

/// PLC标签服务接口定义
pub mod plc_tag_service;

/// Mock PLC服务实现（用于开发和测试）
pub mod mock_plc_service;


/// Modbus TCP实现
pub mod modbus_plc_service;

// 重新导出主要接口和类型
pub use mock_plc_service::*;
pub use modbus_plc_service::ModbusPlcService;
pub use plc_tag_service::*;
