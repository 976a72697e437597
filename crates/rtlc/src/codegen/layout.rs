use crate::HashMap;

/// Handle to one storage entry of a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub usize);

/// Native integer type a value is kept in. Values wider than the native
/// limit use arbitrary precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    U8,
    U16,
    U32,
    U64,
    Wide,
}

impl StorageClass {
    pub fn for_width(width: usize, native_limit: usize) -> Self {
        match width {
            w if w > native_limit => StorageClass::Wide,
            0..=8 => StorageClass::U8,
            9..=16 => StorageClass::U16,
            17..=32 => StorageClass::U32,
            _ => StorageClass::U64,
        }
    }

    /// Bytes per element; wide values are stored out of line.
    pub fn byte_size(self) -> usize {
        match self {
            StorageClass::U8 => 1,
            StorageClass::U16 => 2,
            StorageClass::U32 => 4,
            StorageClass::U64 => 8,
            StorageClass::Wide => 0,
        }
    }

    pub fn is_wide(self) -> bool {
        self == StorageClass::Wide
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub width: usize,
    pub sign: bool,
    /// Element count; 1 for scalars.
    pub len: usize,
    pub class: StorageClass,
    /// Byte offset inside the narrow storage block.
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    slots: Vec<SlotInfo>,
    by_name: HashMap<String, Slot>,
    native_limit: usize,
    narrow_size: usize,
}

impl Layout {
    pub fn new(native_limit: usize) -> Self {
        Self {
            native_limit,
            ..Default::default()
        }
    }

    pub fn add(&mut self, name: &str, width: usize, sign: bool, len: usize) -> Slot {
        let class = StorageClass::for_width(width, self.native_limit);
        let align = class.byte_size().max(1);
        let offset = (self.narrow_size + align - 1) & !(align - 1);
        self.narrow_size = offset + class.byte_size() * len;

        let slot = Slot(self.slots.len());
        self.slots.push(SlotInfo {
            name: name.to_string(),
            width,
            sign,
            len,
            class,
            offset,
        });
        self.by_name.insert(name.to_string(), slot);
        slot
    }

    pub fn info(&self, slot: Slot) -> &SlotInfo {
        &self.slots[slot.0]
    }

    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.by_name.get(name).copied()
    }

    pub fn native_limit(&self) -> usize {
        self.native_limit
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &SlotInfo)> {
        self.slots.iter().enumerate().map(|(i, info)| (Slot(i), info))
    }

    /// Bytes of natively stored values, aligned to 8.
    pub fn narrow_size(&self) -> usize {
        (self.narrow_size + 7) & !7
    }
}
