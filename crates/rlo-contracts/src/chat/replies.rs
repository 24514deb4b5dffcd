//! Fixed user-facing strings. The interface speaks Arabic only.

pub const NO_IMAGE_GENERATED: &str = "تعذر إنشاء الصورة، جرّب وصفاً مختلفاً.";

pub const GENERATION_FAILED: &str = "حدث خطأ أثناء إنشاء الصورة. حاول مرة أخرى لاحقاً.";

pub const NO_PREVIOUS_IMAGE: &str = "لم يتم العثور على صورة سابقة لتحميلها.";

pub const SUPPORT_REPLY: &str =
    "مرحباً بك في الدعم الفني! يسعدنا مساعدتك. اضغط على الزر أدناه للتواصل معنا مباشرة عبر واتساب.";

pub const SUPPORT_ACTION_TEXT: &str = "تواصل مع الدعم";

pub const DEFAULT_SUPPORT_URL: &str = "https://wa.me/966500000000";
