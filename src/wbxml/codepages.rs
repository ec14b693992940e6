//! WBXML code page tables for the MS-ASCMD command set.
//!
//! Each page maps tag bytes `0x05..=0x3F` (the content-bearing range; `0x00`
//! `0x01` `0x02` `0x03` `0x04` are the global tokens handled in
//! [`super::decoder`]) to element local-names. Namespace prefixes are not
//! part of WBXML; the textual XML front-end in [`super::xml_bridge`]
//! synthesizes them from the page name on decode and strips them on encode.

/// Identifies one of the EAS WBXML code pages by its `SWITCH_PAGE` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePage {
    /// Page 0: `AirSync`.
    AirSync,
    /// Page 1: `Contacts`.
    Contacts,
    /// Page 2: `Email`.
    Email,
    /// Page 4: `Calendar`.
    Calendar,
    /// Page 5: `Move`.
    Move,
    /// Page 7: `FolderHierarchy`.
    FolderHierarchy,
    /// Page 14: `Provision`.
    Provision,
    /// Page 15: `Search`.
    Search,
    /// Page 16: `Gal`.
    Gal,
    /// Page 17: `AirSyncBase`.
    AirSyncBase,
    /// Page 18: `Settings`.
    Settings,
    /// Page 20: `ItemOperations`.
    ItemOperations,
    /// Page 21: `ComposeMail`.
    ComposeMail,
}

impl CodePage {
    /// Resolves a `SWITCH_PAGE` index to a known code page.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0 => Self::AirSync,
            1 => Self::Contacts,
            2 => Self::Email,
            4 => Self::Calendar,
            5 => Self::Move,
            7 => Self::FolderHierarchy,
            14 => Self::Provision,
            15 => Self::Search,
            16 => Self::Gal,
            17 => Self::AirSyncBase,
            18 => Self::Settings,
            20 => Self::ItemOperations,
            21 => Self::ComposeMail,
            _ => return None,
        })
    }

    /// The `SWITCH_PAGE` index for this code page.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::AirSync => 0,
            Self::Contacts => 1,
            Self::Email => 2,
            Self::Calendar => 4,
            Self::Move => 5,
            Self::FolderHierarchy => 7,
            Self::Provision => 14,
            Self::Search => 15,
            Self::Gal => 16,
            Self::AirSyncBase => 17,
            Self::Settings => 18,
            Self::ItemOperations => 20,
            Self::ComposeMail => 21,
        }
    }

    /// The XML namespace prefix this crate's textual front-end uses for
    /// elements on this page, matching the prefixes in the MS-ASCMD schema
    /// documentation.
    #[must_use]
    pub const fn xml_prefix(self) -> &'static str {
        match self {
            Self::AirSync => "AirSync",
            Self::Contacts => "Contacts",
            Self::Email => "Email",
            Self::Calendar => "Calendar",
            Self::Move => "Move",
            Self::FolderHierarchy => "FolderHierarchy",
            Self::Provision => "Provision",
            Self::Search => "Search",
            Self::Gal => "Gal",
            Self::AirSyncBase => "AirSyncBase",
            Self::Settings => "Settings",
            Self::ItemOperations => "ItemOperations",
            Self::ComposeMail => "ComposeMail",
        }
    }

    /// Looks up the element local-name for a content tag byte (with the
    /// high "has attributes"/"has content" bits already masked off, so the
    /// value is in `0x05..=0x3F`).
    #[must_use]
    pub fn tag_name(self, tag: u8) -> Option<&'static str> {
        match self {
            Self::AirSync => airsync_tag(tag),
            Self::Calendar => calendar_tag(tag),
            Self::FolderHierarchy => folder_hierarchy_tag(tag),
            Self::Provision => provision_tag(tag),
            Self::AirSyncBase => airsyncbase_tag(tag),
            Self::Move => move_tag(tag),
            Self::ComposeMail => compose_mail_tag(tag),
            Self::Settings => settings_tag(tag),
            Self::Contacts | Self::Email | Self::Search | Self::Gal | Self::ItemOperations => None,
        }
    }

    /// Reverse lookup of [`Self::tag_name`], used by the encoder.
    #[must_use]
    pub fn tag_code(self, name: &str) -> Option<u8> {
        (0x05..=0x3F).find(|&t| self.tag_name(t) == Some(name))
    }
}

fn airsync_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "Sync",
        0x06 => "Responses",
        0x07 => "Add",
        0x08 => "Change",
        0x09 => "Delete",
        0x0A => "Fetch",
        0x0B => "SyncKey",
        0x0C => "ClientId",
        0x0D => "ServerId",
        0x0E => "Status",
        0x0F => "Collection",
        0x10 => "Class",
        0x12 => "CollectionId",
        0x13 => "GetChanges",
        0x14 => "MoreAvailable",
        0x15 => "WindowSize",
        0x16 => "Commands",
        0x17 => "Options",
        0x18 => "FilterType",
        0x1B => "Conflict",
        0x1C => "Collections",
        0x1D => "ApplicationData",
        0x1E => "DeletesAsMoves",
        0x20 => "Supported",
        0x21 => "SoftDelete",
        0x22 => "MIMESupport",
        0x23 => "MIMETruncation",
        0x24 => "Wait",
        0x25 => "Limit",
        0x26 => "Partial",
        0x27 => "ConversationMode",
        0x28 => "MaxItems",
        0x29 => "HeartbeatInterval",
        _ => return None,
    })
}

fn calendar_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "Timezone",
        0x06 => "AllDayEvent",
        0x07 => "Attendees",
        0x08 => "Attendee",
        0x09 => "Attendee_Email",
        0x0A => "Attendee_Name",
        0x0D => "BusyStatus",
        0x0E => "Body",
        0x0F => "Categories",
        0x10 => "Category",
        0x11 => "CompressedRTF",
        0x12 => "DTStamp",
        0x13 => "EndTime",
        0x14 => "Exception",
        0x15 => "Exceptions",
        0x16 => "Exception_Deleted",
        0x17 => "Exception_StartTime",
        0x18 => "Location",
        0x19 => "MeetingStatus",
        0x1A => "Organizer_Email",
        0x1B => "Organizer_Name",
        0x1C => "Recurrence",
        0x1D => "Recurrence_Type",
        0x1E => "Recurrence_Until",
        0x1F => "Recurrence_Occurrences",
        0x20 => "Recurrence_Interval",
        0x21 => "Recurrence_DayOfWeek",
        0x22 => "Recurrence_DayOfMonth",
        0x23 => "Recurrence_WeekOfMonth",
        0x24 => "Recurrence_MonthOfYear",
        0x25 => "Reminder",
        0x26 => "Sensitivity",
        0x27 => "Subject",
        0x28 => "StartTime",
        0x29 => "UID",
        0x2A => "Attendee_Status",
        0x2B => "Attendee_Type",
        _ => return None,
    })
}

fn folder_hierarchy_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "DisplayName",
        0x06 => "ServerId",
        0x07 => "ParentId",
        0x08 => "Type",
        0x09 => "Status",
        0x0A => "FolderSync",
        0x0B => "SyncKey",
        0x0C => "Changes",
        0x0D => "Add",
        0x0E => "Delete",
        0x0F => "Update",
        0x10 => "Folder",
        0x11 => "Count",
        _ => return None,
    })
}

fn provision_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "Provision",
        0x06 => "Policies",
        0x07 => "Policy",
        0x08 => "PolicyType",
        0x09 => "PolicyKey",
        0x0A => "Data",
        0x0B => "Status",
        0x0C => "RemoteWipe",
        0x0D => "EASProvisionDoc",
        0x0E => "DevicePasswordEnabled",
        0x0F => "AlphanumericDevicePasswordRequired",
        0x10 => "DeviceEncryptionEnabled",
        0x13 => "AttachmentsEnabled",
        0x14 => "MinDevicePasswordLength",
        0x15 => "MaxInactivityTimeDeviceLock",
        0x16 => "MaxDevicePasswordFailedAttempts",
        0x17 => "MaxAttachmentSize",
        0x18 => "AllowSimpleDevicePassword",
        0x19 => "DevicePasswordExpiration",
        0x1A => "DevicePasswordHistory",
        0x1B => "AllowStorageCard",
        0x1C => "AllowCamera",
        0x1D => "RequireDeviceEncryption",
        0x1E => "AllowUnsignedApplications",
        0x1F => "AllowUnsignedInstallationPackages",
        0x20 => "MinDevicePasswordComplexCharacters",
        0x21 => "AllowWiFi",
        0x22 => "AllowTextMessaging",
        0x23 => "AllowPOPIMAPEmail",
        0x24 => "AllowBluetooth",
        0x25 => "AllowIrDA",
        0x26 => "RequireManualSyncWhenRoaming",
        0x27 => "AllowDesktopSync",
        0x28 => "MaxCalendarAgeFilter",
        0x29 => "AllowHTMLEmail",
        0x2A => "MaxEmailAgeFilter",
        0x2B => "MaxEmailBodyTruncationSize",
        0x2C => "MaxEmailHTMLBodyTruncationSize",
        0x2D => "RequireSignedSMIMEMessages",
        0x2E => "RequireEncryptedSMIMEMessages",
        0x2F => "RequireSignedSMIMEAlgorithm",
        0x30 => "RequireEncryptionSMIMEAlgorithm",
        0x31 => "AllowSMIMEEncryptionAlgorithmNegotiation",
        0x32 => "AllowSMIMESoftCerts",
        0x33 => "DeviceEncryptionEnabled2",
        0x34 => "AllowExternalDeviceManagement",
        0x35 => "AllowMobileOTAUpdate",
        0x36 => "AllowDesktopEmail",
        _ => return None,
    })
}

fn airsyncbase_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "BodyPreference",
        0x06 => "Type",
        0x07 => "TruncationSize",
        0x08 => "AllOrNone",
        0x0A => "Body",
        0x0B => "Data",
        0x0C => "EstimatedDataSize",
        0x0D => "Truncated",
        0x0E => "Attachments",
        0x0F => "Attachment",
        0x10 => "DisplayName",
        0x11 => "FileReference",
        0x12 => "Method",
        0x13 => "ContentId",
        0x14 => "ContentLocation",
        0x15 => "IsInline",
        0x16 => "NativeBodyType",
        0x17 => "ContentType",
        0x18 => "Preview",
        _ => return None,
    })
}

fn move_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "MoveItems",
        0x06 => "Move",
        0x07 => "SrcMsgId",
        0x08 => "SrcFldId",
        0x09 => "DstFldId",
        0x0A => "Response",
        0x0B => "Status",
        0x0C => "DstMsgId",
        _ => return None,
    })
}

fn settings_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "Settings",
        0x06 => "Status",
        0x07 => "Get",
        0x08 => "Set",
        0x09 => "Oof",
        0x0A => "OofState",
        0x0B => "StartTime",
        0x0C => "EndTime",
        0x0D => "OofMessage",
        0x0E => "AppliesToDomain",
        0x0F => "AppliesToInternal",
        0x10 => "AppliesToExternal",
        0x11 => "AppliesToExternalUnknown",
        0x12 => "Enabled",
        0x13 => "ReplyMessage",
        0x14 => "BodyType",
        0x15 => "DevicePassword",
        0x16 => "Password",
        0x17 => "DeviceInformation",
        0x18 => "Model",
        0x19 => "IMEI",
        0x1A => "FriendlyName",
        0x1B => "OS",
        0x1C => "OSLanguage",
        0x1D => "PhoneNumber",
        0x1E => "UserInformation",
        0x1F => "EmailAddresses",
        0x20 => "SmtpAddress",
        0x21 => "UserAgent",
        0x22 => "EnableOutboundSMS",
        0x23 => "MobileOperator",
        _ => return None,
    })
}

fn compose_mail_tag(tag: u8) -> Option<&'static str> {
    Some(match tag {
        0x05 => "SendMail",
        0x06 => "SmartForward",
        0x07 => "SmartReply",
        0x08 => "SaveInSentItems",
        0x09 => "Source",
        0x0A => "FolderId",
        0x0B => "ItemId",
        0x0C => "LongId",
        0x0D => "InstanceId",
        0x0E => "Mime",
        0x0F => "ClientId",
        0x10 => "Status",
        0x11 => "AccountId",
        _ => return None,
    })
}
