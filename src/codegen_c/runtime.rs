//! The C runtime emitted ahead of generated code.
//!
//! Two fragments: [`C_RUNTIME_HEADER`] goes into the generated header
//! (object model typedefs and runtime prototypes), [`C_RUNTIME_IMPL`] into
//! the implementation file (slab allocator, tracing collector, strings,
//! arrays, throw frames).
//!
//! Contracts the generated code relies on:
//!
//! - Object header `{next_object, type, object_size, reference_count}`;
//!   every allocation is linked into one process-wide object list that,
//!   together with singletons and positive reference counts, forms the GC
//!   root set.
//! - Slab allocator: 4 KiB pages; free lists at 64-byte granularity up to
//!   256 bytes, slot `(size + 63) >> 6` on both allocate and free; larger
//!   blocks fall through to `malloc`.
//! - Mark phase stores the bitwise complement of `object_size`; sweep
//!   keeps complemented objects (restoring the size) and frees the rest.
//!   Collection only runs when generated code calls `Argon_gc`.
//! - Strings are immutable UTF-16 with a cached hash; arrays carry
//!   `{count, element_size, is_reference_array}` ahead of the payload, and
//!   overlapping element moves preserve source order (`memmove`).

pub(super) const C_RUNTIME_HEADER: &str = r#"
#include <stdio.h>
#include <stdlib.h>
#include <stdint.h>
#include <stdbool.h>
#include <string.h>
#include <setjmp.h>
#include <math.h>

typedef int32_t  ArgonInt32;
typedef int64_t  ArgonInt64;
typedef double   ArgonReal64;
typedef uint16_t ArgonCharacter;
typedef bool     ArgonLogical;

typedef struct ArgonType   ArgonType;
typedef struct ArgonObject ArgonObject;

struct ArgonObject {
    ArgonObject *next_object;
    ArgonType   *type;
    ArgonInt32   object_size;
    ArgonInt32   reference_count;
};

typedef struct ArgonArray {
    ArgonObject header;
    ArgonInt32  count;
    ArgonInt32  element_size;
    ArgonLogical is_reference_array;
} ArgonArray;

typedef struct ArgonString {
    ArgonObject header;
    ArgonInt32  count;
    ArgonInt32  hash_code;
    ArgonCharacter characters[1];
} ArgonString;

struct ArgonType {
    const char  *name;
    ArgonInt32   index;
    ArgonInt32   object_size;
    ArgonInt32   dispatch_base;
    ArgonInt32   base_count;
    const ArgonInt32 *base_ids;
    void        (*trace)(ArgonObject *obj);
    void        (*init_defaults)(ArgonObject *obj);
    ArgonObject **singleton;
};

typedef struct ArgonTryFrame {
    jmp_buf env;
    struct ArgonTryFrame *prior;
} ArgonTryFrame;

extern ArgonType      Argon_types[];
extern const ArgonInt32 Argon_type_count;
extern void          *Argon_dispatch[];
extern ArgonString   *Argon_literal_strings[];
extern ArgonTryFrame *Argon_current_try;
extern ArgonObject   *Argon_thrown;

ArgonObject *Argon_create_object(ArgonType *type);
ArgonObject *Argon_singleton(ArgonType *type);
ArgonArray  *Argon_create_array(ArgonInt32 count, ArgonInt32 element_size,
                                ArgonLogical is_reference_array);
void        *Argon_array_data(ArgonArray *array);
void         Argon_array_set(ArgonArray *dest, ArgonInt32 dest_index,
                             ArgonArray *src, ArgonInt32 src_index,
                             ArgonInt32 count);
ArgonLogical Argon_instance_of(ArgonObject *obj, ArgonInt32 type_index);
ArgonObject *Argon_check_cast(ArgonObject *obj, ArgonInt32 type_index);
ArgonObject *Argon_as(ArgonObject *obj, ArgonInt32 type_index);
void         Argon_throw(ArgonObject *obj);

void        *Argon_alloc(size_t size);
void         Argon_free(void *block, size_t size);
void         Argon_gc(void);
void         Argon_gc_trace(ArgonObject *obj);

ArgonString *Argon_string_from_utf8(const char *utf8);
ArgonString *Argon_string_plus_string(ArgonString *a, ArgonString *b);
ArgonLogical Argon_string_equals(ArgonString *a, ArgonString *b);
ArgonInt32   Argon_string_compare(ArgonString *a, ArgonString *b);
ArgonInt32   Argon_string_hash(ArgonString *s);
ArgonString *Argon_int32_to_string(ArgonInt32 value);
ArgonString *Argon_int64_to_string(ArgonInt64 value);
ArgonString *Argon_real64_to_string(ArgonReal64 value);
ArgonString *Argon_character_to_string(ArgonCharacter value);
ArgonString *Argon_logical_to_string(ArgonLogical value);
void         Argon_print_string(ArgonString *s);
void         Argon_println_string(ArgonString *s);

ArgonInt32   Argon_pow_int32(ArgonInt32 base, ArgonInt32 exponent);
ArgonInt64   Argon_pow_int64(ArgonInt64 base, ArgonInt64 exponent);
"#;

pub(super) const C_RUNTIME_IMPL: &str = r#"
/* ========== Slab allocator ==========
 * One bank of 4 KiB pages; free lists at 64-byte granularity serve blocks
 * up to 256 bytes, slot = (size + 63) >> 6 on both paths. Larger blocks
 * fall through to malloc. */

#define ARGON_PAGE_SIZE   4096
#define ARGON_GRANULARITY 64
#define ARGON_SMALL_LIMIT 256
#define ARGON_SLOT_COUNT  ((ARGON_SMALL_LIMIT / ARGON_GRANULARITY) + 1)

typedef struct ArgonFreeBlock {
    struct ArgonFreeBlock *next;
} ArgonFreeBlock;

typedef struct ArgonPage {
    struct ArgonPage *next;
    size_t            used;
    unsigned char     data[ARGON_PAGE_SIZE];
} ArgonPage;

static ArgonPage      *Argon_pages = NULL;
static ArgonFreeBlock *Argon_free_lists[ARGON_SLOT_COUNT] = {0};

ArgonTryFrame *Argon_current_try = NULL;
ArgonObject   *Argon_thrown = NULL;
static ArgonObject *Argon_objects = NULL;

static size_t Argon_slot_size(size_t size) {
    return ((size + ARGON_GRANULARITY - 1) / ARGON_GRANULARITY) * ARGON_GRANULARITY;
}

void *Argon_alloc(size_t size) {
    if (size == 0) size = 1;
    if (size > ARGON_SMALL_LIMIT) {
        return calloc(1, size);
    }
    size_t slot = (size + ARGON_GRANULARITY - 1) >> 6;
    if (Argon_free_lists[slot]) {
        ArgonFreeBlock *block = Argon_free_lists[slot];
        Argon_free_lists[slot] = block->next;
        memset(block, 0, Argon_slot_size(size));
        return block;
    }
    size_t rounded = Argon_slot_size(size);
    if (!Argon_pages || Argon_pages->used + rounded > ARGON_PAGE_SIZE) {
        ArgonPage *page = (ArgonPage *)calloc(1, sizeof(ArgonPage));
        page->next = Argon_pages;
        page->used = 0;
        Argon_pages = page;
    }
    void *block = Argon_pages->data + Argon_pages->used;
    Argon_pages->used += rounded;
    return block;
}

void Argon_free(void *block, size_t size) {
    if (!block) return;
    if (size == 0) size = 1;
    if (size > ARGON_SMALL_LIMIT) {
        free(block);
        return;
    }
    size_t slot = (size + ARGON_GRANULARITY - 1) >> 6;
    ArgonFreeBlock *entry = (ArgonFreeBlock *)block;
    entry->next = Argon_free_lists[slot];
    Argon_free_lists[slot] = entry;
}

/* ========== Object model ========== */

ArgonObject *Argon_create_object(ArgonType *type) {
    ArgonObject *obj = (ArgonObject *)Argon_alloc((size_t)type->object_size);
    obj->type = type;
    obj->object_size = type->object_size;
    obj->reference_count = 0;
    obj->next_object = Argon_objects;
    Argon_objects = obj;
    if (type->init_defaults) type->init_defaults(obj);
    return obj;
}

ArgonObject *Argon_singleton(ArgonType *type) {
    if (type->singleton && !*type->singleton) {
        *type->singleton = Argon_create_object(type);
    }
    return type->singleton ? *type->singleton : NULL;
}

ArgonLogical Argon_instance_of(ArgonObject *obj, ArgonInt32 type_index) {
    ArgonInt32 i;
    if (!obj) return false;
    if (obj->type->index == type_index) return true;
    for (i = 0; i < obj->type->base_count; ++i) {
        if (obj->type->base_ids[i] == type_index) return true;
    }
    return false;
}

ArgonObject *Argon_check_cast(ArgonObject *obj, ArgonInt32 type_index) {
    if (obj && !Argon_instance_of(obj, type_index)) {
        fprintf(stderr, "invalid cast: %s is not a %s\n",
                obj->type->name, Argon_types[type_index].name);
        exit(3);
    }
    return obj;
}

ArgonObject *Argon_as(ArgonObject *obj, ArgonInt32 type_index) {
    return Argon_instance_of(obj, type_index) ? obj : NULL;
}

void Argon_throw(ArgonObject *obj) {
    Argon_thrown = obj;
    if (!Argon_current_try) {
        fprintf(stderr, "uncaught %s\n", obj ? obj->type->name : "null");
        exit(1);
    }
    longjmp(Argon_current_try->env, 1);
}

/* ========== Tracing collector ==========
 * Mark: object_size flips to its bitwise complement. Sweep: complemented
 * objects survive (size restored); everything else returns to the slab or
 * the system allocator. Runs only when generated code asks. */

void Argon_gc_trace(ArgonObject *obj) {
    if (!obj || obj->object_size < 0) return;
    obj->object_size = ~obj->object_size;
    if (obj->type->trace) obj->type->trace(obj);
}

void Argon_gc(void) {
    ArgonInt32 i;
    ArgonObject *obj, *next, *survivors = NULL;

    for (i = 0; i < Argon_type_count; ++i) {
        if (Argon_types[i].singleton && *Argon_types[i].singleton) {
            Argon_gc_trace(*Argon_types[i].singleton);
        }
    }
    for (obj = Argon_objects; obj; obj = obj->next_object) {
        if (obj->reference_count > 0 && obj->object_size >= 0) {
            Argon_gc_trace(obj);
        }
    }

    for (obj = Argon_objects; obj; obj = next) {
        next = obj->next_object;
        if (obj->object_size < 0) {
            obj->object_size = ~obj->object_size;
            obj->next_object = survivors;
            survivors = obj;
        } else {
            Argon_free(obj, (size_t)obj->object_size);
        }
    }
    Argon_objects = survivors;
}

/* ========== Arrays ========== */

ArgonArray *Argon_create_array(ArgonInt32 count, ArgonInt32 element_size,
                               ArgonLogical is_reference_array) {
    size_t bytes = sizeof(ArgonArray) + (size_t)count * (size_t)element_size;
    ArgonArray *array;
    ArgonType *array_type = &Argon_types[0]; /* Object entry doubles for raw arrays */
    array = (ArgonArray *)Argon_alloc(bytes);
    array->header.type = array_type;
    array->header.object_size = (ArgonInt32)bytes;
    array->header.next_object = Argon_objects;
    Argon_objects = (ArgonObject *)array;
    array->count = count;
    array->element_size = element_size;
    array->is_reference_array = is_reference_array;
    return array;
}

void *Argon_array_data(ArgonArray *array) {
    return (void *)(array + 1);
}

/* Overlapping copies preserve source order. */
void Argon_array_set(ArgonArray *dest, ArgonInt32 dest_index,
                     ArgonArray *src, ArgonInt32 src_index, ArgonInt32 count) {
    unsigned char *d = (unsigned char *)Argon_array_data(dest);
    unsigned char *s = (unsigned char *)Argon_array_data(src);
    memmove(d + (size_t)dest_index * dest->element_size,
            s + (size_t)src_index * src->element_size,
            (size_t)count * dest->element_size);
}

/* ========== Strings ========== */

static ArgonString *Argon_string_with_count(ArgonInt32 count) {
    size_t bytes = sizeof(ArgonString) + (size_t)count * sizeof(ArgonCharacter);
    ArgonString *s = (ArgonString *)Argon_alloc(bytes);
    s->header.type = &Argon_types[0];
    s->header.object_size = (ArgonInt32)bytes;
    s->header.next_object = Argon_objects;
    Argon_objects = (ArgonObject *)s;
    s->count = count;
    s->hash_code = 0;
    return s;
}

ArgonString *Argon_string_from_utf8(const char *utf8) {
    ArgonInt32 count = 0;
    const unsigned char *p = (const unsigned char *)utf8;
    while (*p) {
        if ((*p & 0xC0) != 0x80) ++count;
        ++p;
    }
    {
        ArgonString *s = Argon_string_with_count(count);
        ArgonInt32 i = 0;
        p = (const unsigned char *)utf8;
        while (*p) {
            uint32_t cp = 0;
            if (*p < 0x80) { cp = *p; p += 1; }
            else if ((*p & 0xE0) == 0xC0) { cp = (*p & 0x1F) << 6 | (p[1] & 0x3F); p += 2; }
            else if ((*p & 0xF0) == 0xE0) {
                cp = (uint32_t)(*p & 0x0F) << 12 | (uint32_t)(p[1] & 0x3F) << 6 | (p[2] & 0x3F);
                p += 3;
            } else {
                cp = 0xFFFD;
                p += 4;
            }
            s->characters[i++] = (ArgonCharacter)cp;
        }
        return s;
    }
}

ArgonString *Argon_string_plus_string(ArgonString *a, ArgonString *b) {
    ArgonString *s = Argon_string_with_count(a->count + b->count);
    memcpy(s->characters, a->characters, (size_t)a->count * sizeof(ArgonCharacter));
    memcpy(s->characters + a->count, b->characters,
           (size_t)b->count * sizeof(ArgonCharacter));
    return s;
}

ArgonLogical Argon_string_equals(ArgonString *a, ArgonString *b) {
    if (a == b) return true;
    if (!a || !b || a->count != b->count) return false;
    return memcmp(a->characters, b->characters,
                  (size_t)a->count * sizeof(ArgonCharacter)) == 0;
}

ArgonInt32 Argon_string_compare(ArgonString *a, ArgonString *b) {
    ArgonInt32 i, limit = a->count < b->count ? a->count : b->count;
    for (i = 0; i < limit; ++i) {
        if (a->characters[i] != b->characters[i]) {
            return a->characters[i] < b->characters[i] ? -1 : 1;
        }
    }
    if (a->count == b->count) return 0;
    return a->count < b->count ? -1 : 1;
}

ArgonInt32 Argon_string_hash(ArgonString *s) {
    if (s->hash_code == 0) {
        ArgonInt32 i, hash = 0;
        for (i = 0; i < s->count; ++i) {
            hash = hash * 7 + (ArgonInt32)s->characters[i];
        }
        s->hash_code = hash;
    }
    return s->hash_code;
}

ArgonString *Argon_int32_to_string(ArgonInt32 value) {
    char buffer[16];
    snprintf(buffer, sizeof buffer, "%d", value);
    return Argon_string_from_utf8(buffer);
}

ArgonString *Argon_int64_to_string(ArgonInt64 value) {
    char buffer[24];
    snprintf(buffer, sizeof buffer, "%lld", (long long)value);
    return Argon_string_from_utf8(buffer);
}

ArgonString *Argon_real64_to_string(ArgonReal64 value) {
    char buffer[40];
    snprintf(buffer, sizeof buffer, "%g", value);
    return Argon_string_from_utf8(buffer);
}

ArgonString *Argon_character_to_string(ArgonCharacter value) {
    ArgonString *s = Argon_string_with_count(1);
    s->characters[0] = value;
    return s;
}

ArgonString *Argon_logical_to_string(ArgonLogical value) {
    return Argon_string_from_utf8(value ? "true" : "false");
}

void Argon_print_string(ArgonString *s) {
    ArgonInt32 i;
    if (!s) { fputs("null", stdout); return; }
    for (i = 0; i < s->count; ++i) {
        uint32_t cp = s->characters[i];
        if (cp < 0x80) {
            fputc((int)cp, stdout);
        } else if (cp < 0x800) {
            fputc(0xC0 | (cp >> 6), stdout);
            fputc(0x80 | (cp & 0x3F), stdout);
        } else {
            fputc(0xE0 | (cp >> 12), stdout);
            fputc(0x80 | ((cp >> 6) & 0x3F), stdout);
            fputc(0x80 | (cp & 0x3F), stdout);
        }
    }
}

void Argon_println_string(ArgonString *s) {
    Argon_print_string(s);
    fputc('\n', stdout);
}

/* ========== Numeric helpers ========== */

ArgonInt32 Argon_pow_int32(ArgonInt32 base, ArgonInt32 exponent) {
    ArgonInt32 result = 1;
    while (exponent > 0) {
        if (exponent & 1) result *= base;
        base *= base;
        exponent >>= 1;
    }
    return result;
}

ArgonInt64 Argon_pow_int64(ArgonInt64 base, ArgonInt64 exponent) {
    ArgonInt64 result = 1;
    while (exponent > 0) {
        if (exponent & 1) result *= base;
        base *= base;
        exponent >>= 1;
    }
    return result;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_declares_the_abi() {
        for needle in [
            "ArgonObject *next_object",
            "ArgonInt32   object_size",
            "ArgonInt32  element_size",
            "ArgonInt32  hash_code",
            "ArgonCharacter characters",
        ] {
            assert!(C_RUNTIME_HEADER.contains(needle), "missing {}", needle);
        }
    }

    #[test]
    fn slab_uses_ceiling_rounded_slots_on_both_paths() {
        let occurrences = C_RUNTIME_IMPL
            .matches("(size + ARGON_GRANULARITY - 1) >> 6")
            .count();
        assert_eq!(occurrences, 2, "alloc and free must share the slot formula");
        assert!(C_RUNTIME_IMPL.contains("#define ARGON_PAGE_SIZE   4096"));
        assert!(C_RUNTIME_IMPL.contains("#define ARGON_SMALL_LIMIT 256"));
    }

    #[test]
    fn gc_marks_by_complementing_size() {
        assert!(C_RUNTIME_IMPL.contains("obj->object_size = ~obj->object_size;"));
    }

    #[test]
    fn overlapping_array_copy_preserves_order() {
        assert!(C_RUNTIME_IMPL.contains("memmove"));
    }
}
