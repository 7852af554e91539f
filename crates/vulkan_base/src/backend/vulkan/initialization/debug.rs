//! Driver diagnostic forwarding
//!
//! In debug builds with validation enabled, the validation layer reports
//! messages through `VK_EXT_debug_utils`. Each message is turned into a
//! [`DiagnosticMessage`] and handed synchronously to the [`DiagnosticSink`]
//! injected when the device context was created. The sink is owned by the
//! messenger, so no global state is involved.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use std::ffi::{c_void, CStr};

use super::context::{VulkanError, VulkanResult};
use crate::core::config::DiagnosticsConfig;

/// Severity of a driver diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    /// Diagnostic chatter
    Verbose,
    /// Informational messages such as resource creation
    Info,
    /// Likely misuse or performance problem
    Warning,
    /// Invalid API usage
    Error,
}

impl DiagnosticSeverity {
    /// Collapse a driver severity bitmask to its highest set level
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }

    /// Log level a message of this severity is written at
    pub fn log_level(self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warning => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Verbose => log::Level::Trace,
        }
    }
}

/// One driver diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    /// Highest severity bit reported for the message
    pub severity: DiagnosticSeverity,
    /// General / validation / performance classification
    pub kinds: vk::DebugUtilsMessageTypeFlagsEXT,
    /// Message id name from the reporting layer, or `"Vulkan"` when absent
    pub layer: String,
    /// Message body
    pub text: String,
}

/// Receiver of driver diagnostics.
///
/// Called from whichever thread the driver reports on, so implementations
/// must be thread safe and must not panic.
pub trait DiagnosticSink: Send + Sync {
    /// Handle one message
    fn receive(&self, message: &DiagnosticMessage);
}

/// Default sink writing every message to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn receive(&self, message: &DiagnosticMessage) {
        log::log!(
            target: "vulkan",
            message.severity.log_level(),
            "[{}] {:?} - {}",
            message.layer,
            message.kinds,
            message.text
        );
    }
}

/// Severities the messenger subscribes to.
///
/// Warnings and errors always; info and verbose only on request.
pub fn messenger_severities(config: &DiagnosticsConfig) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let mut severities =
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if config.include_verbose {
        severities |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    severities
}

/// Registered debug messenger plus the sink it forwards to
pub(crate) struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    // Double box: the callback receives a thin pointer to the inner box,
    // whose address is stable for as long as this struct lives.
    _sink: Box<Box<dyn DiagnosticSink>>,
}

impl DebugMessenger {
    pub(crate) fn new(
        entry: &Entry,
        instance: &Instance,
        config: &DiagnosticsConfig,
        sink: Box<dyn DiagnosticSink>,
    ) -> VulkanResult<Self> {
        let loader = DebugUtils::new(entry, instance);
        let sink = Box::new(sink);
        let user_data = std::ptr::addr_of!(*sink) as *mut c_void;

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(messenger_severities(config))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(user_data);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(VulkanError::api("vkCreateDebugUtilsMessengerEXT"))?;

        log::debug!("Driver diagnostics forwarding installed");

        Ok(Self {
            loader,
            messenger,
            _sink: sink,
        })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe fn lossy_string(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }
    let data = &*callback_data;
    let sink = &*(user_data as *const Box<dyn DiagnosticSink>);

    let message = DiagnosticMessage {
        severity: DiagnosticSeverity::from_vk(message_severity),
        kinds: message_type,
        layer: lossy_string(data.p_message_id_name).unwrap_or_else(|| "Vulkan".to_string()),
        text: lossy_string(data.p_message).unwrap_or_default(),
    };
    sink.receive(&message);

    // Never abort the call that triggered the message
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct CollectingSink {
        messages: Arc<Mutex<Vec<DiagnosticMessage>>>,
    }

    impl DiagnosticSink for CollectingSink {
        fn receive(&self, message: &DiagnosticMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn test_severity_from_flags() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(DiagnosticSeverity::from_vk(S::ERROR), DiagnosticSeverity::Error);
        assert_eq!(DiagnosticSeverity::from_vk(S::WARNING), DiagnosticSeverity::Warning);
        assert_eq!(DiagnosticSeverity::from_vk(S::INFO), DiagnosticSeverity::Info);
        assert_eq!(DiagnosticSeverity::from_vk(S::VERBOSE), DiagnosticSeverity::Verbose);
        assert_eq!(DiagnosticSeverity::from_vk(S::WARNING | S::INFO), DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(DiagnosticSeverity::Error.log_level(), log::Level::Error);
        assert_eq!(DiagnosticSeverity::Warning.log_level(), log::Level::Warn);
        assert_eq!(DiagnosticSeverity::Verbose.log_level(), log::Level::Trace);
        assert!(DiagnosticSeverity::Error > DiagnosticSeverity::Info);
    }

    #[test]
    fn test_verbose_filtered_by_default() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        let quiet = messenger_severities(&DiagnosticsConfig::default());
        assert_eq!(quiet, S::WARNING | S::ERROR);

        let chatty = messenger_severities(&DiagnosticsConfig { include_verbose: true });
        assert!(chatty.contains(S::INFO | S::VERBOSE | S::WARNING | S::ERROR));
    }

    #[test]
    fn test_callback_forwards_to_sink() {
        let collecting = CollectingSink::default();
        let sink: Box<dyn DiagnosticSink> = Box::new(collecting.clone());
        let boxed = Box::new(sink);
        let user_data = std::ptr::addr_of!(*boxed) as *mut c_void;

        let id = CStr::from_bytes_with_nul(b"VUID-vkCmdDraw-None-02699\0").unwrap();
        let text = CStr::from_bytes_with_nul(b"descriptor set not bound\0").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message_id_name: id.as_ptr(),
            p_message: text.as_ptr(),
            ..Default::default()
        };

        let result = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                user_data,
            )
        };
        assert_eq!(result, vk::FALSE);

        let anonymous = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: text.as_ptr(),
            ..Default::default()
        };
        unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                &anonymous,
                user_data,
            );
        }

        let messages = collecting.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].severity, DiagnosticSeverity::Error);
        assert_eq!(messages[0].layer, "VUID-vkCmdDraw-None-02699");
        assert_eq!(messages[0].text, "descriptor set not bound");
        assert_eq!(messages[1].layer, "Vulkan");
        assert_eq!(messages[1].kinds, vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE);
    }
}
